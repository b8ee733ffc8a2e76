//! Free-text status parsing.
//!
//! The bot reports progress as chat messages, not a typed protocol. The
//! [`StatusParser`] strategy isolates that fragile text matching behind
//! a narrow contract so it can be tested against a corpus of sample
//! messages and swapped per bot. [`MidjourneyStatusParser`] handles the
//! `**<prompt>** - <@user> (status)` shape.

use regex::Regex;

/// Stage marker extracted from a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMarker {
    /// An initial draft generation (also covers queued/in-progress lines
    /// that do not name a stage).
    Draft,
    /// A "Variations" follow-up result.
    Variation,
    /// An "Image #N" upscale result.
    Upscale(u8),
}

impl StageMarker {
    /// Whether a message with this marker can describe a task at the
    /// given stage. Queued/progress lines do not distinguish drafts from
    /// variations, so a `Draft` marker is compatible with both.
    pub fn compatible_with(self, stage: easel_core::task::Stage) -> bool {
        use easel_core::task::Stage;
        match self {
            Self::Draft => matches!(stage, Stage::Draft | Stage::Variation(_)),
            Self::Variation => matches!(stage, Stage::Variation(_)),
            Self::Upscale(q) => matches!(stage, Stage::Upscale(sq) if sq == q),
        }
    }
}

/// A successfully parsed status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatus {
    /// Normalized prompt text (reference URLs stripped).
    pub prompt: String,
    pub marker: StageMarker,
    /// Completion percentage when the line reports one; queued lines
    /// report 0, terminal lines report `None`.
    pub progress: Option<u8>,
    /// The line announces a finished result rather than an in-progress
    /// state. Terminal resolution additionally requires an attachment.
    pub terminal: bool,
}

/// Strategy interface for reading one bot's status-message dialect.
pub trait StatusParser: Send + Sync {
    /// Parse the free text of a bot message. `None` when the message
    /// does not look like a generation status at all.
    fn parse(&self, content: &str) -> Option<ParsedStatus>;
}

/// Normalize a prompt for text matching: drop `<...>` reference tokens
/// and bare URLs, collapse runs of whitespace.
pub fn normalize_prompt(prompt: &str) -> String {
    let words: Vec<&str> = prompt
        .split_whitespace()
        .filter(|w| !(w.starts_with('<') && w.ends_with('>')))
        .filter(|w| !w.starts_with("http://") && !w.starts_with("https://"))
        .collect();
    words.join(" ")
}

// ---------------------------------------------------------------------------
// Midjourney dialect
// ---------------------------------------------------------------------------

/// Parser for the Midjourney message shape:
///
/// - queued:    `**prompt** - <@123> (Waiting to start)`
/// - progress:  `**prompt** - <@123> (31%) (fast)`
/// - draft:     `**prompt** - <@123> (fast)`
/// - variation: `**prompt** - Variations by <@123> (fast)`
/// - upscale:   `**prompt** - Image #2 <@123>`
pub struct MidjourneyStatusParser {
    content_re: Regex,
    percent_re: Regex,
    upscale_re: Regex,
}

impl MidjourneyStatusParser {
    pub fn new() -> Self {
        Self {
            content_re: Regex::new(r"(?s)^\*\*(?P<prompt>.+)\*\* - (?P<rest>.+)$")
                .expect("static regex"),
            percent_re: Regex::new(r"\((?P<pct>\d{1,3})%\)").expect("static regex"),
            upscale_re: Regex::new(r"Image #(?P<q>[1-4])").expect("static regex"),
        }
    }
}

impl Default for MidjourneyStatusParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusParser for MidjourneyStatusParser {
    fn parse(&self, content: &str) -> Option<ParsedStatus> {
        let caps = self.content_re.captures(content.trim())?;
        let prompt = normalize_prompt(&caps["prompt"]);
        let rest = caps["rest"].trim();

        if let Some(upscale) = self.upscale_re.captures(rest) {
            let quadrant: u8 = upscale["q"].parse().ok()?;
            return Some(ParsedStatus {
                prompt,
                marker: StageMarker::Upscale(quadrant),
                progress: None,
                terminal: true,
            });
        }

        let marker = if rest.starts_with("Variations") {
            StageMarker::Variation
        } else {
            StageMarker::Draft
        };

        if rest.contains("(Waiting to start)") {
            return Some(ParsedStatus {
                prompt,
                marker,
                progress: Some(0),
                terminal: false,
            });
        }

        if let Some(pct) = self.percent_re.captures(rest) {
            let progress: u8 = pct["pct"].parse::<u16>().ok()?.min(100) as u8;
            return Some(ParsedStatus {
                prompt,
                marker,
                progress: Some(progress),
                terminal: false,
            });
        }

        // No progress marker: a finished draft/variation line such as
        // "(fast)" or "(relaxed)".
        Some(ParsedStatus {
            prompt,
            marker,
            progress: None,
            terminal: true,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
