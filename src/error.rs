//! Error taxonomy surfaced to gateway callers.

use crate::wire::DecodeError;

/// Result alias used throughout the room/gateway layers.
pub type SyncResult<T> = Result<T, SyncError>;

/// Every failure a caller of the gateway surface can observe.
///
/// Store-level errors (`DuplicateEntity`, `UnknownEntity`) are reported to
/// the originating session only; they never abort a room's apply loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("room '{0}' does not exist or is not joinable")]
    RoomNotFound(String),

    #[error("room '{0}' is at member capacity")]
    RoomFull(String),

    #[error("auth token rejected")]
    AuthRejected,

    #[error("client '{0}' already joined this room")]
    AlreadyJoined(String),

    #[error("entity '{0}' already exists")]
    DuplicateEntity(String),

    #[error("entity '{0}' does not exist")]
    UnknownEntity(String),

    #[error("envelope decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The room actor is gone (shut down or crashed); the session should
    /// terminate rather than retry.
    #[error("room '{0}' is no longer running")]
    RoomClosed(String),
}
