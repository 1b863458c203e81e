//! Weighted random track selection

use crate::catalog::TrackCatalog;
use crate::error::{Error, Result};
use crate::track::Track;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default probability of picking from the album pool
pub const DEFAULT_ALBUM_CHANCE: f64 = 0.1;
/// Default time between two automatic reshuffles
pub const DEFAULT_RESHUFFLE_INTERVAL: Duration = Duration::from_secs(7 * 3600);
/// Default number of catalog reloads before giving up
pub const DEFAULT_MAX_RELOAD_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Probability in `[0, 1]` of drawing from the album pool
    pub album_chance: f64,
    pub reshuffle_interval: Duration,
    /// Reloads attempted when both pools are empty
    pub max_reload_attempts: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            album_chance: DEFAULT_ALBUM_CHANCE,
            reshuffle_interval: DEFAULT_RESHUFFLE_INTERVAL,
            max_reload_attempts: DEFAULT_MAX_RELOAD_ATTEMPTS,
        }
    }
}

/// Picks the next track to play
///
/// Selection is memoryless: the same track may come up twice in a row.
pub struct TrackScheduler<R = StdRng> {
    catalog: TrackCatalog,
    config: SchedulerConfig,
    rng: R,
}

impl TrackScheduler<StdRng> {
    pub fn new(catalog: TrackCatalog, config: SchedulerConfig) -> Self {
        Self::with_rng(catalog, config, StdRng::from_os_rng())
    }
}

impl<R: Rng + Send> TrackScheduler<R> {
    pub fn with_rng(catalog: TrackCatalog, config: SchedulerConfig, rng: R) -> Self {
        Self {
            catalog,
            config,
            rng,
        }
    }

    pub fn catalog(&self) -> &TrackCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut TrackCatalog {
        &mut self.catalog
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Loads the catalog using the scheduler's random source
    pub fn load(&mut self) {
        self.catalog.load_with(&mut self.rng);
    }

    /// Returns the next track
    ///
    /// When both pools are empty the catalog is reloaded, at most
    /// `max_reload_attempts` times, before failing with
    /// [`Error::CatalogEmpty`].
    pub fn next(&mut self) -> Result<Track> {
        let mut reloads = 0;

        loop {
            if self.catalog.last_shuffle().elapsed() >= self.config.reshuffle_interval {
                info!("🔀 Reshuffling catalog");
                self.catalog.reshuffle_with(&mut self.rng);
            }

            if let Some(track) = self.pick() {
                debug!("Selected {} (album: {})", track, track.is_album_track());
                return Ok(track);
            }

            if reloads >= self.config.max_reload_attempts {
                return Err(Error::CatalogEmpty {
                    root: self.catalog.root().to_path_buf(),
                    attempts: reloads,
                });
            }

            reloads += 1;
            warn!(
                "Catalog is empty, reloading (attempt {}/{})",
                reloads, self.config.max_reload_attempts
            );
            self.catalog.load_with(&mut self.rng);
        }
    }

    fn pick(&mut self) -> Option<Track> {
        let draw: f64 = self.rng.random();

        if draw < self.config.album_chance {
            if let Some(track) = self.catalog.album().choose(&mut self.rng) {
                return Some(track.clone());
            }
        }

        if let Some(track) = self.catalog.general().choose(&mut self.rng) {
            return Some(track.clone());
        }

        // Bibliothèque composée uniquement d'albums
        self.catalog.album().choose(&mut self.rng).cloned()
    }
}
