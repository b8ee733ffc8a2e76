//! Album record: one bulk-generation session and its accumulated results.
//!
//! An [`Album`] is mutated only by the progress aggregator, under an
//! exclusive section, and persisted as a JSON document after every
//! update so that an interrupted run can resume from the `finished`
//! index list.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{AlbumId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an album.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumStatus {
    /// Created but no events processed yet.
    Created,
    /// Events are being processed.
    Running,
    /// The stream closed with every image accounted for (100%).
    Finished,
    /// The stream closed with some images missing (>0%, <100%).
    PartiallyFinished,
    /// The run was cancelled before the stream closed.
    Cancelled,
}

impl AlbumStatus {
    /// Human-readable label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::PartiallyFinished => "partially finished",
            Self::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// A materialized result image. Immutable once appended to an album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// The decorated prompt that produced this image.
    pub prompt: String,
    /// Source URL handed out by the bot.
    pub url: String,
    /// Local file name relative to the album directory; `None` when
    /// downloads are disabled.
    #[serde(default)]
    pub file: Option<String>,
}

// ---------------------------------------------------------------------------
// Album
// ---------------------------------------------------------------------------

/// One bulk-generation session covering an ordered prompt list and its
/// resulting images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: AlbumId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub status: AlbumStatus,
    /// Monotonically non-decreasing within a single run.
    pub percentage: f32,
    /// Ordered prompt list; position is the correlation key across runs.
    pub prompts: Vec<String>,
    pub images: Vec<Image>,
    /// Indices of prompts whose full stage chain completed. Used to skip
    /// already-finished prompts on resume.
    pub finished: Vec<usize>,
}

impl Album {
    /// Create an empty album for the given prompt list.
    pub fn new(id: AlbumId, prompts: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            status: AlbumStatus::Created,
            percentage: 0.0,
            prompts,
            images: Vec::new(),
            finished: Vec::new(),
        }
    }

    /// The finished indices as a set, for skip checks on resume.
    pub fn finished_set(&self) -> HashSet<usize> {
        self.finished.iter().copied().collect()
    }

    /// Record a prompt index as fully finished.
    ///
    /// Out-of-range indices and duplicates are ignored, preserving the
    /// invariant that `finished` holds unique, valid indices.
    pub fn mark_finished(&mut self, index: usize) {
        if index < self.prompts.len() && !self.finished.contains(&index) {
            self.finished.push(index);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn album() -> Album {
        Album::new("a1".into(), vec!["cat".into(), "dog".into()])
    }

    #[test]
    fn new_album_starts_empty() {
        let album = album();
        assert_eq!(album.status, AlbumStatus::Created);
        assert_eq!(album.percentage, 0.0);
        assert!(album.images.is_empty());
        assert!(album.finished.is_empty());
    }

    #[test]
    fn mark_finished_ignores_duplicates() {
        let mut album = album();
        album.mark_finished(1);
        album.mark_finished(1);
        assert_eq!(album.finished, vec![1]);
    }

    #[test]
    fn mark_finished_ignores_out_of_range() {
        let mut album = album();
        album.mark_finished(2);
        assert!(album.finished.is_empty());
    }

    #[test]
    fn finished_set_round_trips() {
        let mut album = album();
        album.mark_finished(0);
        album.mark_finished(1);
        let set = album.finished_set();
        assert!(set.contains(&0) && set.contains(&1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn status_labels_are_non_empty() {
        let statuses = [
            AlbumStatus::Created,
            AlbumStatus::Running,
            AlbumStatus::Finished,
            AlbumStatus::PartiallyFinished,
            AlbumStatus::Cancelled,
        ];
        for s in statuses {
            assert!(!s.label().is_empty());
        }
    }
}
