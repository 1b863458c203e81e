//! Track handles and the now-playing snapshot

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One playable audio file
///
/// Immutable once enumerated. Two tracks are equal when they point to the
/// same location and belong to the same pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Track {
    path: PathBuf,
    is_album_track: bool,
}

impl Track {
    pub fn new(path: impl Into<PathBuf>, is_album_track: bool) -> Self {
        Self {
            path: path.into(),
            is_album_track,
        }
    }

    /// A track from the top-level pool
    pub fn general(path: impl Into<PathBuf>) -> Self {
        Self::new(path, false)
    }

    /// A track found in a subfolder of the music root
    pub fn album(path: impl Into<PathBuf>) -> Self {
        Self::new(path, true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_album_track(&self) -> bool {
        self.is_album_track
    }

    /// File name without extension, used in logs and `/echo/now-playing`
    pub fn display_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// What the relay is currently streaming
#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub title: String,
    pub path: PathBuf,
    pub album_track: bool,
    pub interlude: bool,
    pub started_at: DateTime<Utc>,
}

impl NowPlaying {
    pub fn new(track: &Track, interlude: bool) -> Self {
        Self {
            title: track.display_name(),
            path: track.path().to_path_buf(),
            album_track: track.is_album_track(),
            interlude,
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_strips_extension() {
        let track = Track::album("/music/Album/01 - Intro.mp3");
        assert_eq!(track.display_name(), "01 - Intro");
        assert!(track.is_album_track());
    }

    #[test]
    fn test_now_playing_copies_track_fields() {
        let track = Track::general("/music/song.mp3");
        let now = NowPlaying::new(&track, false);
        assert_eq!(now.title, "song");
        assert_eq!(now.path, PathBuf::from("/music/song.mp3"));
        assert!(!now.album_track);
        assert!(!now.interlude);
    }
}
