//! Core batching, buffering, and pooling primitives for shipping log events.
//!
//! `logship-core` is the engine of a log-shipping appender: producers hand it log events, and it
//! serializes them into pooled buffers, accumulates them into batches by size or elapsed time,
//! and hands each built batch to a delivery listener. The wire protocol, authentication, and
//! backend specifics live in collaborator crates; this crate owns the concurrency coordination,
//! buffer lifecycle, and failure routing in between.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod batch;
pub mod buf;
pub mod config;
pub mod delivery;
pub mod pooling;
pub mod serialize;
