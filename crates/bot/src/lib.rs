//! Chat-bot transport surface and event correlation.
//!
//! The underlying messaging session (connect, auth, gateway) is an
//! external collaborator consumed through the [`BotTransport`] and
//! [`Downloader`] traits plus an inbound feed of raw [`ChannelMessage`]s.
//! This crate turns that weakly-structured feed into typed task
//! resolutions: the [`Correlator`] actor owns the outstanding-task table
//! and matches each message to the task that spawned it, using the
//! pluggable [`StatusParser`] strategy to read the bot's free-text
//! status lines.

pub mod correlator;
pub mod http;
pub mod message;
pub mod parse;
pub mod transport;

pub use correlator::{
    CompletedGeneration, Correlator, CorrelatorHandle, ProgressUpdate, TaskId, TaskRegistration,
};
pub use http::HttpDownloader;
pub use message::{ActionComponent, Attachment, ChannelMessage, MessageKind};
pub use parse::{MidjourneyStatusParser, ParsedStatus, StageMarker, StatusParser};
pub use transport::{BotCommand, BotError, BotTransport, Downloader};
