//! The two rotation pools of the relay

use crate::source::TrackSource;
use crate::track::Track;
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Known tracks, split between the general and the album pool
///
/// Both pools are replaced wholesale by [`load`](Self::load) and
/// [`reshuffle`](Self::reshuffle); nothing else mutates them.
pub struct TrackCatalog {
    root: PathBuf,
    source: Arc<dyn TrackSource>,
    general: Vec<Track>,
    album: Vec<Track>,
    last_shuffle: Instant,
}

impl std::fmt::Debug for TrackCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackCatalog")
            .field("root", &self.root)
            .field("general", &self.general.len())
            .field("album", &self.album.len())
            .field("last_shuffle", &self.last_shuffle)
            .finish()
    }
}

impl TrackCatalog {
    /// Creates an empty catalog; call [`load`](Self::load) to fill it
    pub fn new(root: impl Into<PathBuf>, source: Arc<dyn TrackSource>) -> Self {
        Self {
            root: root.into(),
            source,
            general: Vec::new(),
            album: Vec::new(),
            last_shuffle: Instant::now(),
        }
    }

    /// Re-enumerates the music root, then reshuffles
    ///
    /// Never fails: an empty or unreadable root leaves both pools empty.
    pub fn load(&mut self) {
        self.load_with(&mut rand::rng());
    }

    /// [`load`](Self::load) with an explicit random source
    pub fn load_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let (general, album) = self.source.discover(&self.root);
        self.general = general;
        self.album = album;

        if self.is_empty() {
            warn!("No playable track found under {}", self.root.display());
        } else {
            info!(
                "📀 Loaded {} main tracks and {} album tracks from {}",
                self.general.len(),
                self.album.len(),
                self.root.display()
            );
        }

        self.reshuffle_with(rng);
    }

    /// Permutes both pools independently and resets the shuffle clock
    pub fn reshuffle(&mut self) {
        self.reshuffle_with(&mut rand::rng());
    }

    /// [`reshuffle`](Self::reshuffle) with an explicit random source
    pub fn reshuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut general = self.general.clone();
        let mut album = self.album.clone();
        general.shuffle(rng);
        album.shuffle(rng);
        self.general = general;
        self.album = album;
        self.last_shuffle = Instant::now();
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn general(&self) -> &[Track] {
        &self.general
    }

    pub fn album(&self) -> &[Track] {
        &self.album
    }

    pub fn last_shuffle(&self) -> Instant {
        self.last_shuffle
    }

    pub fn len(&self) -> usize {
        self.general.len() + self.album.len()
    }

    pub fn is_empty(&self) -> bool {
        self.general.is_empty() && self.album.is_empty()
    }
}
