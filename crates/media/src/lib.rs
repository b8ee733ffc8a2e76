//! Artifact materialization: turning finished generation results into
//! image files and thumbnails on local disk.
//!
//! [`ops`] holds the pure image primitives (grid splitting, thumbnail
//! resizing); [`materialize`] drives them per event. Every failure here
//! is per-artifact: logged, skipped, and never surfaced to the run.

pub mod materialize;
pub mod ops;

pub use materialize::{MaterializeOptions, Materializer};
pub use ops::{split_grid, thumbnail, MediaError};
