//! # echoradio - Relais audio en direct
//!
//! Cette crate sélectionne des pistes en continu, les transcode via un
//! processus `ffmpeg` supervisé et diffuse le flux obtenu à tous les
//! auditeurs connectés, chacun rejoignant le flux en cours de route.
//!
//! ## Architecture
//!
//! ```text
//! TrackSource ──► TrackCatalog ──► TrackScheduler
//!                                        │ next()
//!                                        ▼
//!                   PlaybackLoop ──► TranscodePipeline ──► Broadcaster ──► listeners
//!                                        │
//!                                  EncoderSpawner (ffmpeg)
//! ```
//!
//! - [`catalog`] / [`scheduler`] : rotation des pistes (pool général et albums)
//! - [`pipeline`] : supervision d'un encodeur par piste (blocages, crashs)
//! - [`broadcaster`] : ensemble des auditeurs sous verrou unique
//! - [`playback`] : boucle principale, interlude et piste en cours
//! - `streaming_ext` : routes `/echo` sur un `echoserver::Server` (feature `server`)
//!
//! ## Exemple
//!
//! ```no_run
//! use echoradio::{
//!     Broadcaster, DirectoryTrackSource, FfmpegSpawner, PipelineConfig, PlaybackConfig,
//!     PlaybackLoop, SchedulerConfig, TrackCatalog, TrackScheduler, TranscodePipeline,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> echoradio::Result<()> {
//! let catalog = TrackCatalog::new("/srv/music", Arc::new(DirectoryTrackSource::default()));
//! let scheduler = TrackScheduler::new(catalog, SchedulerConfig::default());
//! let broadcaster = Arc::new(Broadcaster::default());
//! let pipeline = TranscodePipeline::new(
//!     Arc::new(FfmpegSpawner::default()),
//!     broadcaster.clone(),
//!     PipelineConfig::default(),
//! );
//!
//! let cancel = CancellationToken::new();
//! let handle = PlaybackLoop::new(scheduler, pipeline, PlaybackConfig::default())
//!     .start(cancel.clone())?;
//! # cancel.cancel();
//! # let _ = handle.await;
//! # Ok(())
//! # }
//! ```

pub mod broadcaster;
pub mod catalog;
pub mod encoder;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod playback;
pub mod scheduler;
pub mod source;
pub mod track;

#[cfg(feature = "echoconfig")]
pub mod config_ext;

#[cfg(feature = "server")]
pub mod streaming_ext;

pub use broadcaster::{Broadcaster, ChannelListener, ListenerGuard, ListenerId, ListenerSink};
pub use catalog::TrackCatalog;
pub use encoder::{EncoderConfig, EncoderProcess, EncoderSpawner, FfmpegSpawner, ProcessExit};
pub use error::{Error, ListenerWriteError, Result};
pub use metadata::{LoftyStripper, MetadataStripper};
pub use pipeline::{
    Disposition, PipelineConfig, PipelineState, SessionReport, TranscodePipeline,
};
pub use playback::{NowPlayingReceiver, PlaybackConfig, PlaybackLoop};
pub use scheduler::{SchedulerConfig, TrackScheduler};
pub use source::{DirectoryTrackSource, TrackSource};
pub use track::{NowPlaying, Track};

#[cfg(feature = "echoconfig")]
pub use config_ext::RadioConfigExt;

#[cfg(feature = "server")]
pub use streaming_ext::{RadioStreamingExt, RadioStreamingState, radio_router};
