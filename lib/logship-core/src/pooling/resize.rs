use crate::config::ConfigError;

/// Management view of an item source pool.
///
/// Resize policies operate against this narrow interface rather than the pool itself, which keeps
/// them independent of the pooled buffer type and trivially testable.
pub trait PoolOps {
    /// Returns the name of the pool.
    fn name(&self) -> &str;

    /// Returns the number of items the pool was created with.
    fn initial_size(&self) -> usize;

    /// Returns the total number of items owned by the pool, available or checked out.
    fn total_size(&self) -> usize;

    /// Returns the number of items currently available for checkout.
    fn available_size(&self) -> usize;

    /// Creates `delta` new items and makes them available.
    fn increment_size(&self, delta: usize);

    /// Removes and destroys one available item.
    ///
    /// Returns `false` if no item was available to remove. Checked-out items are never reclaimed
    /// by force.
    fn remove(&self) -> bool;
}

/// A strategy deciding how a pool grows under pressure and shrinks when idle.
pub trait ResizePolicy: Send + Sync {
    /// Grows the pool.
    ///
    /// Returns `true` if at least one item was added. A `false` return means the policy cannot
    /// grow this pool any further, and callers waiting on an empty pool will not be unblocked.
    fn increase(&self, pool: &dyn PoolOps) -> bool;

    /// Shrinks the pool back towards its initial size.
    ///
    /// Returns `true` if at least one item was removed. The pool never shrinks below its initial
    /// size, and only available items are removed.
    fn decrease(&self, pool: &dyn PoolOps) -> bool;

    /// Returns whether the policy could currently grow the pool.
    ///
    /// Used to short-circuit resize scheduling without entering the resize critical section.
    fn can_resize(&self, pool: &dyn PoolOps) -> bool {
        let _ = pool;
        true
    }

    /// Returns whether the policy can ever grow a pool with the given initial size.
    ///
    /// Checked once at pool construction; a policy that computes zero-element increments is a
    /// configuration error, not a runtime condition.
    fn can_grow_from(&self, initial_size: usize) -> bool {
        let _ = initial_size;
        true
    }
}

fn validate_factor(resize_factor: f64) -> Result<(), ConfigError> {
    if !resize_factor.is_finite() || resize_factor <= 0.0 || resize_factor > 1.0 {
        return Err(ConfigError::InvalidResizeFactor { value: resize_factor });
    }
    Ok(())
}

fn scaled(count: usize, resize_factor: f64) -> usize {
    (count as f64 * resize_factor).round() as usize
}

fn shrink(pool: &dyn PoolOps, resize_factor: f64) -> bool {
    let total = pool.total_size();
    let removable = scaled(total, resize_factor)
        .min(total.saturating_sub(pool.initial_size()))
        .min(pool.available_size());
    if removable == 0 {
        return false;
    }

    let mut removed = 0;
    for _ in 0..removable {
        // An item may be checked out between the availability read and here, so stop as soon as
        // the pool comes up empty.
        if !pool.remove() {
            break;
        }
        removed += 1;
    }
    removed > 0
}

/// A resize policy with no upper bound on pool size.
///
/// Each `increase` adds `round(initial_size * resize_factor)` items.
pub struct UnlimitedResizePolicy {
    resize_factor: f64,
}

impl UnlimitedResizePolicy {
    /// Creates an `UnlimitedResizePolicy` with the given resize factor.
    ///
    /// # Errors
    ///
    /// If the resize factor is not within `(0.0, 1.0]`, an error is returned.
    pub fn new(resize_factor: f64) -> Result<Self, ConfigError> {
        validate_factor(resize_factor)?;
        Ok(Self { resize_factor })
    }
}

impl ResizePolicy for UnlimitedResizePolicy {
    fn increase(&self, pool: &dyn PoolOps) -> bool {
        let additional = scaled(pool.initial_size(), self.resize_factor);
        if additional == 0 {
            return false;
        }
        pool.increment_size(additional);
        true
    }

    fn decrease(&self, pool: &dyn PoolOps) -> bool {
        shrink(pool, self.resize_factor)
    }

    fn can_grow_from(&self, initial_size: usize) -> bool {
        scaled(initial_size, self.resize_factor) > 0
    }
}

/// A resize policy that caps the total pool size at a configured maximum.
///
/// Grows like [`UnlimitedResizePolicy`], but adds only enough items to reach `max_size` when the
/// full increment would exceed it, and refuses to grow a pool already at or above `max_size`.
pub struct LimitedResizePolicy {
    resize_factor: f64,
    max_size: usize,
}

impl LimitedResizePolicy {
    /// Creates a `LimitedResizePolicy` with the given resize factor and maximum pool size.
    ///
    /// # Errors
    ///
    /// If the resize factor is not within `(0.0, 1.0]`, or `max_size` is zero, an error is
    /// returned.
    pub fn new(resize_factor: f64, max_size: usize) -> Result<Self, ConfigError> {
        validate_factor(resize_factor)?;
        if max_size == 0 {
            return Err(ConfigError::NotPositive { field: "max_size" });
        }
        Ok(Self {
            resize_factor,
            max_size,
        })
    }
}

impl ResizePolicy for LimitedResizePolicy {
    fn increase(&self, pool: &dyn PoolOps) -> bool {
        let total = pool.total_size();
        if total >= self.max_size {
            return false;
        }

        let additional = scaled(pool.initial_size(), self.resize_factor).min(self.max_size - total);
        if additional == 0 {
            return false;
        }
        pool.increment_size(additional);
        true
    }

    fn decrease(&self, pool: &dyn PoolOps) -> bool {
        shrink(pool, self.resize_factor)
    }

    fn can_resize(&self, pool: &dyn PoolOps) -> bool {
        pool.total_size() < self.max_size
    }

    fn can_grow_from(&self, initial_size: usize) -> bool {
        scaled(initial_size, self.resize_factor) > 0
    }
}
