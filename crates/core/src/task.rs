//! Generation stages and the per-prompt lifecycle state machine.
//!
//! Each prompt moves through an explicit state machine
//! (`pending -> draft running -> follow-ups running -> done/failed`)
//! instead of being inferred from scattered counters. The dispatcher
//! feeds task resolutions into [`PromptProgress`] and gets back the
//! follow-up stages to schedule plus the `is_last` signal for the
//! prompt's final event.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Quadrants in a 2x2 composite, in button order (1 = top-left,
/// 2 = top-right, 3 = bottom-left, 4 = bottom-right).
pub const QUADRANTS: u8 = 4;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One generation stage for a prompt. Quadrant indices are 1-based,
/// matching the bot's button labels (V1..V4, U1..U4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "quadrant", rename_all = "snake_case")]
pub enum Stage {
    /// First-stage 2x2 composite of four candidate images.
    Draft,
    /// Follow-up generation seeded from one quadrant of a draft.
    Variation(u8),
    /// High-resolution single image from one quadrant of a draft or
    /// variation composite.
    Upscale(u8),
}

impl Stage {
    /// Whether the stage result is a 2x2 composite that must be split
    /// into four separate images.
    pub fn is_composite(self) -> bool {
        matches!(self, Self::Draft | Self::Variation(_))
    }

    /// Short tag used in artifact file names.
    pub fn file_tag(self) -> String {
        match self {
            Self::Draft => "grid".to_string(),
            Self::Variation(q) => format!("v{q}"),
            Self::Upscale(q) => format!("u{q}"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Variation(q) => write!(f, "variation {q}"),
            Self::Upscale(q) => write!(f, "upscale {q}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Follow-up plan
// ---------------------------------------------------------------------------

/// Which follow-up stages a run schedules after each successful result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowUpPlan {
    /// Re-roll each draft quadrant into its own 2x2 composite.
    pub variations: bool,
    /// Upscale each quadrant of every draft (and, with `variations`,
    /// of every variation composite) into a single image.
    pub upscale: bool,
}

impl FollowUpPlan {
    /// Follow-up stages to schedule after a successful resolution of
    /// `stage`. Failed tasks never spawn follow-ups.
    pub fn follow_ups(self, stage: Stage) -> Vec<Stage> {
        match stage {
            Stage::Draft => {
                let mut next = Vec::new();
                if self.variations {
                    next.extend((1..=QUADRANTS).map(Stage::Variation));
                }
                if self.upscale {
                    next.extend((1..=QUADRANTS).map(Stage::Upscale));
                }
                next
            }
            Stage::Variation(_) if self.upscale => (1..=QUADRANTS).map(Stage::Upscale).collect(),
            Stage::Variation(_) | Stage::Upscale(_) => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-prompt state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of one prompt within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    /// No task admitted yet.
    Pending,
    /// The draft task is outstanding.
    DraftRunning,
    /// The draft succeeded; variation/upscale tasks are outstanding.
    FollowUpsRunning,
    /// Every scheduled task resolved and at least the draft succeeded.
    Done,
    /// The draft task failed; the chain was abandoned.
    Failed,
}

/// Tracks one prompt's outstanding tasks and drives its state machine.
#[derive(Debug)]
pub struct PromptProgress {
    index: usize,
    plan: FollowUpPlan,
    /// Tasks created (queued or in flight) but not yet resolved.
    unresolved: usize,
    state: PromptState,
}

impl PromptProgress {
    /// Track a prompt that has not been admitted yet.
    pub fn new(index: usize, plan: FollowUpPlan) -> Self {
        Self {
            index,
            plan,
            unresolved: 0,
            state: PromptState::Pending,
        }
    }

    /// Start tracking a prompt whose draft task has just been created.
    pub fn start(index: usize, plan: FollowUpPlan) -> Self {
        let mut progress = Self::new(index, plan);
        progress.begin_draft();
        progress
    }

    /// Record admission of the draft task.
    pub fn begin_draft(&mut self) {
        self.unresolved = 1;
        self.state = PromptState::DraftRunning;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> PromptState {
        self.state
    }

    /// Record a task resolution and return the follow-up stages to
    /// schedule. The caller may discard the follow-ups (e.g. on
    /// cancellation); in that case the prompt simply never completes,
    /// which keeps it out of the album's `finished` list.
    pub fn on_resolved(&mut self, stage: Stage, success: bool) -> Vec<Stage> {
        self.unresolved = self.unresolved.saturating_sub(1);

        let follow_ups = if success {
            self.plan.follow_ups(stage)
        } else {
            Vec::new()
        };
        self.unresolved += follow_ups.len();

        self.state = match (stage, success, self.unresolved) {
            (Stage::Draft, false, _) => PromptState::Failed,
            (_, _, 0) => PromptState::Done,
            _ => PromptState::FollowUpsRunning,
        };

        follow_ups
    }

    /// True once no scheduled or future task remains for this prompt.
    /// The resolution that makes this true carries `is_last` on its
    /// event.
    pub fn is_complete(&self) -> bool {
        matches!(self.state, PromptState::Done | PromptState::Failed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
