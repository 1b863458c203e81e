use anyhow::{Context, Result};
use clap::Parser;
use echoconfig::Config;
use echoradio::{
    Broadcaster, FfmpegSpawner, LoftyStripper, PlaybackLoop, RadioConfigExt, RadioStreamingExt,
    TrackCatalog, TrackScheduler, TranscodePipeline,
};
use echoserver::{LoggingOptions, ServerBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "EchoRadio: continuous MP3 relay over HTTP")]
struct Args {
    /// Host to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the music directory
    #[arg(short, long)]
    music: Option<PathBuf>,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<String>,

    /// Bitrate in kbps
    #[arg(short, long)]
    bitrate: Option<u64>,

    /// Configuration directory (defaults to $ECHORADIO_CONFIG, ./.echoradio or ~/.echoradio)
    #[arg(short, long, default_value = "")]
    config: String,
}

impl Args {
    /// Writes command line overrides into the configuration
    fn apply(&self, config: &Config) -> Result<()> {
        if let Some(host) = &self.host {
            config.set_listen_host(host.clone())?;
        }
        if let Some(port) = self.port {
            config.set_http_port(port)?;
        }
        if let Some(music) = &self.music {
            let music = music
                .canonicalize()
                .with_context(|| format!("Provided music path {} is not a directory", music.display()))?;
            config.set_music_dir(&music)?;
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.set_ffmpeg_path(ffmpeg.clone())?;
        }
        if let Some(bitrate) = self.bitrate {
            config.set_encoder_bitrate(bitrate)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ========== PHASE 1 : Configuration ==========

    let config = echoconfig::init_config(&args.config).context("Failed to load configuration")?;
    args.apply(&config)?;

    let mut server = ServerBuilder::new_configured(&config).build();
    server
        .init_logging(LoggingOptions::from_config(&config))
        .await?;

    let music_dir = config.radio_music_dir()?;
    info!("🎵 Music directory: {}", music_dir.display());

    // ========== PHASE 2 : Radio ==========

    let broadcaster = Arc::new(Broadcaster::new(config.listener_buffer()?));

    let catalog = TrackCatalog::new(&music_dir, Arc::new(config.track_source()?));
    let scheduler = TrackScheduler::new(catalog, config.scheduler_config()?);

    let encoder = config.encoder_config()?;
    info!(
        "🎚️ Encoder: {} ({} @ {} kbps)",
        encoder.ffmpeg.display(),
        encoder.codec,
        encoder.bitrate_kbps
    );
    let pipeline = TranscodePipeline::new(
        Arc::new(FfmpegSpawner::new(encoder)),
        broadcaster.clone(),
        config.pipeline_config()?,
    );

    let playback = PlaybackLoop::new(scheduler, pipeline, config.playback_config(&music_dir)?)
        .with_stripper(Arc::new(LoftyStripper));
    let now_playing = playback.now_playing();

    let cancel = CancellationToken::new();
    let playback_task = playback
        .start(cancel.clone())
        .context("Cannot start the playback loop")?;

    // ========== PHASE 3 : Serveur HTTP ==========

    server
        .add_route("/info", || async {
            serde_json::json!({"name": "EchoRadio", "version": env!("CARGO_PKG_VERSION")})
        })
        .await;
    server
        .init_radio_streaming(broadcaster.clone(), now_playing)
        .await?;

    info!("🌐 Starting HTTP server...");
    server.start().await?;

    let info = server.info();
    info!(
        "✅ EchoRadio is ready at http://{}:{}/echo",
        info.listen_host, info.http_port
    );
    info!("Press Ctrl+C to stop...");

    // la boucle s'arrête avec le serveur
    let shutdown = server.shutdown_token();
    let loop_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        loop_cancel.cancel();
    });

    server.wait().await;
    cancel.cancel();

    if let Err(e) = playback_task.await {
        warn!("Playback task ended abnormally: {}", e);
    }
    info!("👋 EchoRadio stopped");

    Ok(())
}
