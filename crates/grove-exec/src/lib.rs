//! Staged execution primitives for Grove.
//!
//! This crate provides:
//! - A multi-stage pipeline with one dedicated worker thread per stage,
//!   one-slot handoff between stages, and quiescence detection
//! - A bounded worker pool with a shared FIFO backlog
//! - An erased job abstraction with panic containment
//!
//! Everything here is internally concurrent, in contrast to the container
//! crate whose types rely on external serialization.

mod job;
mod pipeline;
mod pool;
mod stage;

pub use job::Job;
pub use pipeline::Pipeline;
pub use pool::{PoolConfig, WorkerPool};
pub use stage::{BoxedItem, Sink, Stage, Transform};
