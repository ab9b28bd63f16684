//! Resume capability for units of work
//!
//! Durable per-unit checkpoints with monotonic cursors, persisted through the
//! [`DurableStore`](crate::store::DurableStore).

pub mod checkpoint;
pub mod tracker;

pub use checkpoint::{Cursor, ProgressCheckpoint, ResumePoint, VideoCursor, SCHEMA_VERSION};
pub use tracker::{ProgressError, ProgressTracker};
