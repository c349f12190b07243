//! Generic error handling for logship crates.
//!
//! Most logship APIs deal in typed errors when the caller can meaningfully branch on the failure
//! mode, and fall back to [`GenericError`] at facade boundaries where the only sensible reaction is
//! to log the error (with context) and move on. This crate provides that generic type along with
//! helpers for attaching context as errors bubble upwards.
#![deny(warnings)]
#![deny(missing_docs)]

use std::fmt::Display;

/// A generic, opaque error.
///
/// Carries an error message, an optional source error, and a backtrace (when captured). Intended
/// for call sites that need to surface _that_ something failed, and why, without callers needing to
/// match on the concrete failure.
pub type GenericError = anyhow::Error;

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

/// Constructs a [`GenericError`] in place.
///
/// Accepts a string literal, a format string with arguments, or any value implementing
/// `std::error::Error`. When given an existing error value, its source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Extension trait for attaching context to the error variant of a `Result`.
///
/// The method names deliberately avoid `context`/`with_context` so that this trait can be imported
/// alongside `snafu::ResultExt` without the two sets of extension methods colliding.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error value with additional context that is only evaluated if an error occurs.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, f)
    }
}
