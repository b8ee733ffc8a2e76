//! Normalized events emitted by the dispatcher for every task resolution.

use serde::Serialize;

use crate::task::Stage;

/// One task resolution, delivered on the fan-in stream in arrival order.
///
/// Events for different prompts are unordered relative to each other;
/// events for one prompt arrive in non-decreasing completion order.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateEvent {
    pub prompt_index: usize,
    /// The decorated prompt text, carried for artifact naming.
    pub prompt: String,
    pub stage: Stage,
    /// Result URL for artifact-bearing completions: the 2x2 composite
    /// for draft/variation stages, the single image for upscales.
    /// `None` for failures and for intermediate completions whose
    /// quadrants are superseded by follow-up upscales.
    pub url: Option<String>,
    /// Error description when the task failed or timed out.
    pub error: Option<String>,
    /// No further tasks will run for this prompt.
    pub is_last: bool,
}

impl GenerateEvent {
    /// A successful resolution. `url` is `None` for intermediate results.
    pub fn completed(
        prompt_index: usize,
        prompt: impl Into<String>,
        stage: Stage,
        url: Option<String>,
        is_last: bool,
    ) -> Self {
        Self {
            prompt_index,
            prompt: prompt.into(),
            stage,
            url,
            error: None,
            is_last,
        }
    }

    /// A failed or timed-out resolution.
    pub fn failed(
        prompt_index: usize,
        prompt: impl Into<String>,
        stage: Stage,
        error: impl Into<String>,
        is_last: bool,
    ) -> Self {
        Self {
            prompt_index,
            prompt: prompt.into(),
            stage,
            url: None,
            error: Some(error.into()),
            is_last,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
