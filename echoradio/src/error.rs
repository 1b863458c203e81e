//! Error types for the radio relay

use std::path::PathBuf;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while selecting, transcoding or broadcasting tracks
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No track could be found, even after reloading the catalog
    #[error("No playable track under {root} after {attempts} reload attempt(s)")]
    CatalogEmpty { root: PathBuf, attempts: usize },

    /// The encoder process could not be started
    #[error("Failed to spawn encoder for {track}: {source}")]
    Spawn {
        track: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The encoder stopped producing output
    #[error("Encoder stalled on {track} after {stalls} empty read(s)")]
    Stall { track: PathBuf, stalls: usize },

    /// The encoder exited with a failure status
    #[error("Encoder crashed on {track} (exit code {code:?})")]
    ProcessCrash { track: PathBuf, code: Option<i32> },

    /// A listener rejected a write
    #[error(transparent)]
    ListenerWrite(#[from] ListenerWriteError),

    /// The configured music directory is unusable
    #[error("Music directory {0} does not exist or is not a directory")]
    InvalidMusicDir(PathBuf),

    /// Metadata stripping failed
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (from echoconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl Error {
    /// Whether the relay should simply move on to the next track
    pub fn is_track_local(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::Stall { .. } | Self::ProcessCrash { .. } | Self::Metadata(_)
        )
    }
}

/// Failure to deliver a chunk to one listener
///
/// Always handled inside [`crate::Broadcaster::broadcast`]: it only removes
/// the faulty listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerWriteError {
    /// The client went away (receiver dropped, connection reset)
    #[error("listener disconnected")]
    Disconnected,

    /// The listener was cancelled while a write was in flight
    #[error("listener cancelled")]
    Cancelled,

    /// Any other IO failure
    #[error("listener IO error: {0}")]
    Io(#[from] std::io::Error),
}
