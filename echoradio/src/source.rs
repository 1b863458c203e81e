//! Track discovery on the filesystem
//!
//! The music root holds two pools:
//!
//! ```text
//! <root>/
//! ├── song1.mp3          ← general pool
//! ├── song2.mp3
//! └── Some Album/
//!     ├── 01.mp3         ← album pool
//!     └── Disc 2/
//!         └── 01.mp3     ← ignored (too deep)
//! ```

use crate::track::Track;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Enumerates the playable tracks below a music root
///
/// Implementations never fail: an unreadable directory simply yields
/// fewer (or no) tracks.
pub trait TrackSource: Send + Sync {
    /// Returns `(general, album)` pools
    fn discover(&self, root: &Path) -> (Vec<Track>, Vec<Track>);
}

/// Default extensions when none is configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp3"];

/// [`TrackSource`] backed by a directory listing
#[derive(Debug, Clone)]
pub struct DirectoryTrackSource {
    extensions: Vec<String>,
    excluded: Vec<String>,
}

impl Default for DirectoryTrackSource {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().copied())
    }
}

impl DirectoryTrackSource {
    /// Extensions are matched case-insensitively, with or without leading dot
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut extensions: Vec<String> = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            extensions = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        }
        Self {
            extensions,
            excluded: Vec::new(),
        }
    }

    /// Ignores top-level files named `file_name` (the interlude, typically)
    pub fn excluding(mut self, file_name: impl Into<String>) -> Self {
        self.excluded.push(file_name.into());
        self
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn is_excluded(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| self.excluded.iter().any(|x| x == n))
            .unwrap_or(false)
    }

    fn is_playable(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_lowercase();
                self.extensions.iter().any(|x| *x == e)
            })
            .unwrap_or(false)
    }

    /// Lists `(files, subdirectories)` of `dir`, both sorted
    fn list(&self, dir: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read directory {}: {}", dir.display(), e);
                return (Vec::new(), Vec::new());
            }
        };

        let mut files = Vec::new();
        let mut dirs = Vec::new();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();

            // suit les liens symboliques
            if path.is_dir() {
                dirs.push(path);
            } else if path.is_file() && self.is_playable(&path) {
                files.push(path);
            }
        }

        files.sort();
        dirs.sort();
        (files, dirs)
    }
}

impl TrackSource for DirectoryTrackSource {
    fn discover(&self, root: &Path) -> (Vec<Track>, Vec<Track>) {
        let (files, subdirs) = self.list(root);

        let general = files
            .into_iter()
            .filter(|f| !self.is_excluded(f))
            .map(Track::general)
            .collect();

        let album = subdirs
            .iter()
            .flat_map(|dir| self.list(dir).0)
            .map(Track::album)
            .collect();

        (general, album)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(path).unwrap();
    }

    #[test]
    fn test_discover_splits_top_level_and_albums() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("b.mp3"));
        touch(&root.join("a.MP3"));
        touch(&root.join("cover.jpg"));
        touch(&root.join("Album/01.mp3"));
        touch(&root.join("Album/notes.txt"));
        touch(&root.join("Album/Disc 2/01.mp3"));

        let (general, album) = DirectoryTrackSource::default().discover(root);

        let general: Vec<_> = general.iter().map(|t| t.path().to_path_buf()).collect();
        assert_eq!(general, vec![root.join("a.MP3"), root.join("b.mp3")]);

        assert_eq!(album.len(), 1);
        assert_eq!(album[0].path(), root.join("Album/01.mp3"));
        assert!(album[0].is_album_track());
    }

    #[test]
    fn test_missing_root_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let (general, album) = DirectoryTrackSource::default().discover(&dir.path().join("nope"));
        assert!(general.is_empty());
        assert!(album.is_empty());
    }

    #[test]
    fn test_custom_extensions() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.flac"));
        touch(&dir.path().join("b.mp3"));

        let source = DirectoryTrackSource::new([".FLAC", "ogg"]);
        assert_eq!(source.extensions(), &["flac".to_string(), "ogg".to_string()]);

        let (general, _) = source.discover(dir.path());
        assert_eq!(general.len(), 1);
        assert_eq!(general[0].path(), dir.path().join("a.flac"));
    }

    #[test]
    fn test_excluded_file_is_skipped_at_top_level_only() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("echorythms.mp3"));
        touch(&dir.path().join("song.mp3"));
        touch(&dir.path().join("Album/echorythms.mp3"));

        let source = DirectoryTrackSource::default().excluding("echorythms.mp3");
        let (general, album) = source.discover(dir.path());
        assert_eq!(general.len(), 1);
        assert_eq!(general[0].path(), dir.path().join("song.mp3"));
        assert_eq!(album.len(), 1);
    }

    #[test]
    fn test_empty_extension_list_falls_back_to_default() {
        let source = DirectoryTrackSource::new(Vec::<String>::new());
        assert_eq!(source.extensions(), &["mp3".to_string()]);
    }
}
