//! Shared type aliases.

/// Albums are identified by caller-supplied string ids; when the caller
/// does not provide one, a UTC timestamp id is generated.
pub type AlbumId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
