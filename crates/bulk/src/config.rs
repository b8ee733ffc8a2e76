//! Bulk request validation and prompt preparation.

use std::time::Duration;

use easel_core::error::CoreError;
use easel_pipeline::dispatcher::{DEFAULT_CONCURRENCY, DEFAULT_MIN_SPACING, DEFAULT_TASK_TIMEOUT};

/// Maximum length of an album id.
const MAX_ALBUM_ID_LEN: usize = 128;

/// Everything one `start_bulk` call needs.
#[derive(Debug, Clone)]
pub struct BulkRequest {
    /// Album to create or resume; defaults to a UTC timestamp id.
    pub album_id: Option<String>,
    /// Raw prompts; decorated and sorted before index assignment.
    pub prompts: Vec<String>,
    /// Prepended to every prompt.
    pub prefix: String,
    /// Appended to every prompt.
    pub suffix: String,
    /// Generate 4 variations per draft.
    pub variation: bool,
    /// Upscale every quadrant into a single image.
    pub upscale: bool,
    /// Download artifacts to disk.
    pub download: bool,
    /// Write reduced-scale previews next to downloads.
    pub thumbnail: bool,
    /// Maximum unresolved tasks at any instant.
    pub concurrency: usize,
    /// Fixed delay between consecutive submissions.
    pub wait: Duration,
    /// Deadline for a task to produce a terminal bot event.
    pub task_timeout: Duration,
}

impl Default for BulkRequest {
    fn default() -> Self {
        Self {
            album_id: None,
            prompts: Vec::new(),
            prefix: String::new(),
            suffix: String::new(),
            variation: false,
            upscale: false,
            download: true,
            thumbnail: false,
            concurrency: DEFAULT_CONCURRENCY,
            wait: DEFAULT_MIN_SPACING,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

impl BulkRequest {
    /// Check the request before any task is scheduled.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prompts.iter().all(|p| p.trim().is_empty()) {
            return Err(CoreError::Configuration("missing prompt".to_string()));
        }
        if self.concurrency < 1 {
            return Err(CoreError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if let Some(id) = &self.album_id {
            validate_album_id(id)?;
        }
        Ok(())
    }

    /// Decorate prompts with the prefix/suffix and sort them so index
    /// assignment is deterministic across runs of the same request.
    pub fn build_prompts(&self) -> Vec<String> {
        let mut prompts: Vec<String> = self
            .prompts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| format!("{}{}{}", self.prefix, p, self.suffix))
            .collect();
        prompts.sort();
        prompts
    }
}

/// Validate an album id: non-empty, bounded, and safe as a directory
/// name (alphanumeric, hyphen, underscore, or dot).
pub fn validate_album_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Configuration(
            "album id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_ALBUM_ID_LEN {
        return Err(CoreError::Configuration(format!(
            "album id must not exceed {MAX_ALBUM_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Configuration(
            "album id may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Timestamp-based id for albums created without an explicit one.
pub fn default_album_id() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn empty_prompt_list_rejected() {
        let request = BulkRequest::default();
        assert_matches!(request.validate(), Err(CoreError::Configuration(_)));
    }

    #[test]
    fn blank_prompts_rejected() {
        let request = BulkRequest {
            prompts: vec!["  ".to_string(), "".to_string()],
            ..Default::default()
        };
        assert_matches!(request.validate(), Err(CoreError::Configuration(_)));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let request = BulkRequest {
            prompts: vec!["a cat".to_string()],
            concurrency: 0,
            ..Default::default()
        };
        assert_matches!(request.validate(), Err(CoreError::Configuration(_)));
    }

    #[test]
    fn valid_request_passes() {
        let request = BulkRequest {
            prompts: vec!["a cat".to_string()],
            album_id: Some("run-2024.1".to_string()),
            ..Default::default()
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn album_id_with_separator_rejected() {
        assert!(validate_album_id("../escape").is_err());
        assert!(validate_album_id("a/b").is_err());
        assert!(validate_album_id("").is_err());
        assert!(validate_album_id(&"x".repeat(MAX_ALBUM_ID_LEN + 1)).is_err());
    }

    #[test]
    fn build_prompts_decorates_and_sorts() {
        let request = BulkRequest {
            prompts: vec!["zebra".to_string(), " ant ".to_string(), "".to_string()],
            prefix: "photo of ".to_string(),
            suffix: " --v 5".to_string(),
            ..Default::default()
        };
        assert_eq!(
            request.build_prompts(),
            vec![
                "photo of ant --v 5".to_string(),
                "photo of zebra --v 5".to_string(),
            ],
        );
    }

    #[test]
    fn default_album_id_shape() {
        let id = default_album_id();
        assert_eq!(id.len(), 15);
        assert!(validate_album_id(&id).is_ok());
    }
}
