//! The relay's main loop: pick a track, play it, repeat

use crate::error::{Error, Result};
use crate::metadata::MetadataStripper;
use crate::pipeline::{Disposition, TranscodePipeline};
use crate::scheduler::TrackScheduler;
use crate::track::{NowPlaying, Track};
use rand::Rng;
use rand::rngs::StdRng;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_INTERLUDE: &str = "echorythms.mp3";
pub const DEFAULT_EMPTY_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_ERROR_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Played after every track when the file exists
    pub interlude: Option<PathBuf>,
    /// Run the metadata stripper before each track
    pub strip_metadata: bool,
    /// Wait before retrying when the catalog is empty
    pub empty_backoff: Duration,
    /// Wait after a track failed, so a broken encoder cannot spin the loop
    pub error_pause: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            interlude: None,
            strip_metadata: false,
            empty_backoff: DEFAULT_EMPTY_BACKOFF,
            error_pause: DEFAULT_ERROR_PAUSE,
        }
    }
}

/// Receiver side of the now-playing channel
pub type NowPlayingReceiver = watch::Receiver<Option<NowPlaying>>;

/// Endless `next track → transcode → broadcast` loop
pub struct PlaybackLoop<R = StdRng> {
    scheduler: Arc<Mutex<TrackScheduler<R>>>,
    pipeline: TranscodePipeline,
    stripper: Option<Arc<dyn MetadataStripper>>,
    config: PlaybackConfig,
    now_playing: watch::Sender<Option<NowPlaying>>,
}

impl<R: Rng + Send + 'static> PlaybackLoop<R> {
    pub fn new(
        scheduler: TrackScheduler<R>,
        pipeline: TranscodePipeline,
        config: PlaybackConfig,
    ) -> Self {
        let (now_playing, _) = watch::channel(None);
        Self {
            scheduler: Arc::new(Mutex::new(scheduler)),
            pipeline,
            stripper: None,
            config,
            now_playing,
        }
    }

    pub fn with_stripper(mut self, stripper: Arc<dyn MetadataStripper>) -> Self {
        self.stripper = Some(stripper);
        self
    }

    /// Subscribes to track changes
    pub fn now_playing(&self) -> NowPlayingReceiver {
        self.now_playing.subscribe()
    }

    /// Loads the catalog and starts the loop in a background task
    ///
    /// Fails with [`Error::CatalogEmpty`] when no track can be found at all.
    /// The task ends when `cancel` is cancelled.
    pub fn start(self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let first = {
            let mut scheduler = lock(&self.scheduler);
            if scheduler.catalog().is_empty() {
                scheduler.load();
            }
            let first = scheduler.next()?;
            info!(
                "📻 Starting playback loop ({} tracks)",
                scheduler.catalog().len()
            );
            first
        };

        Ok(tokio::spawn(async move { self.run(Some(first), cancel).await }))
    }

    /// Runs until `cancel` fires
    ///
    /// Without a `first` track the catalog is loaded on demand.
    pub async fn run(mut self, mut first: Option<Track>, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let next = match first.take() {
                Some(track) => Ok(track),
                None => self.next_track().await,
            };

            let track = match next {
                Ok(track) => track,
                Err(e @ Error::CatalogEmpty { .. }) => {
                    error!("{}; retrying in {:?}", e, self.config.empty_backoff);
                    self.now_playing.send_replace(None);
                    if !pause(&cancel, self.config.empty_backoff).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("Track selection failed: {}", e);
                    if !pause(&cancel, self.config.error_pause).await {
                        break;
                    }
                    continue;
                }
            };

            self.play(&track, false, &cancel).await;

            if cancel.is_cancelled() {
                break;
            }
            if let Some(interlude) = self.interlude() {
                self.play(&interlude, true, &cancel).await;
            }
        }

        self.now_playing.send_replace(None);
        // plus rien ne sera diffusé : les auditeurs encore connectés sont libérés
        self.pipeline.broadcaster().close().await;
        info!("Playback loop stopped");
    }

    /// Next track from the scheduler
    ///
    /// An empty catalog means a directory scan: it runs on the blocking pool.
    async fn next_track(&self) -> Result<Track> {
        let empty = lock(&self.scheduler).catalog().is_empty();
        if !empty {
            return lock(&self.scheduler).next();
        }

        let scheduler = self.scheduler.clone();
        match tokio::task::spawn_blocking(move || lock(&scheduler).next()).await {
            Ok(result) => result,
            Err(e) => Err(Error::Io(io::Error::other(e))),
        }
    }

    /// Existing interlude file, if any
    fn interlude(&self) -> Option<Track> {
        self.config
            .interlude
            .as_ref()
            .filter(|path| path.is_file())
            .map(|path| Track::general(path.clone()))
    }

    /// Plays one track; failures are logged and swallowed
    async fn play(
        &mut self,
        track: &Track,
        interlude: bool,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            return;
        }

        if self.config.strip_metadata && !interlude {
            if let Some(stripper) = self.stripper.clone() {
                strip(stripper, track).await;
            }
        }

        self.now_playing
            .send_replace(Some(NowPlaying::new(track, interlude)));
        info!("🎵 Now playing: {}", track);

        match self.pipeline.run(track, cancel).await {
            Ok(report) if report.disposition == Disposition::Completed => debug!(
                "{} played: {} bytes, {} chunks in {:?}",
                track, report.bytes, report.chunks, report.elapsed
            ),
            Ok(_) => {}
            Err(e) => {
                warn!("Skipping {}: {}", track, e);
                pause(cancel, self.config.error_pause).await;
            }
        }
    }
}

/// Runs the stripper off the async runtime; never fails
async fn strip(stripper: Arc<dyn MetadataStripper>, track: &Track) {
    let path = track.path().to_path_buf();

    match tokio::task::spawn_blocking(move || stripper.strip(&path)).await {
        Ok(Ok(0)) => {}
        Ok(Ok(n)) => debug!("Stripped {} metadata item(s) from {}", n, track),
        Ok(Err(e)) => warn!("Cannot strip metadata from {}: {}", track, e),
        Err(e) => warn!("Metadata task failed for {}: {}", track, e),
    }
}

fn lock<R>(scheduler: &Mutex<TrackScheduler<R>>) -> MutexGuard<'_, TrackScheduler<R>> {
    scheduler.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sleeps for `duration`; returns `false` if cancelled first
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
