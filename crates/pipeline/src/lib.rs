//! Bounded-concurrency task dispatch.
//!
//! The [`Dispatcher`] turns an ordered prompt list into generation
//! tasks, schedules variation/upscale follow-ups per completed result,
//! and fans every resolution into a single event stream consumed by the
//! progress aggregator.

pub mod dispatcher;

pub use dispatcher::{Dispatcher, RunOptions, TaskError};
