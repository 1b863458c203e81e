//! Extension pour construire la configuration de la radio depuis echoconfig
//!
//! Ce module fournit le trait `RadioConfigExt` qui traduit les sections
//! `radio`, `encoder`, `pipeline` et `broadcast` de `echoconfig::Config`
//! en structures typées de la crate.
//!
//! # Exemple
//!
//! ```no_run
//! use echoradio::RadioConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = echoconfig::init_config("")?;
//! let encoder = config.encoder_config()?;
//! println!("Encoding at {} kbps", encoder.bitrate_kbps);
//! # Ok(())
//! # }
//! ```

use crate::encoder::EncoderConfig;
use crate::pipeline::{DEFAULT_STALL_POLL_INTERVAL, PipelineConfig};
use crate::playback::PlaybackConfig;
use crate::scheduler::SchedulerConfig;
use crate::source::DirectoryTrackSource;
use anyhow::{Context, Result};
use echoconfig::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Trait d'extension pour lire la configuration de la radio
pub trait RadioConfigExt {
    /// Répertoire musical validé
    ///
    /// Échoue si aucun répertoire n'est configuré ou s'il n'existe pas.
    fn radio_music_dir(&self) -> Result<PathBuf>;

    fn scheduler_config(&self) -> Result<SchedulerConfig>;

    fn encoder_config(&self) -> Result<EncoderConfig>;

    fn pipeline_config(&self) -> Result<PipelineConfig>;

    /// `music_root` sert à résoudre le chemin de l'interlude
    fn playback_config(&self, music_root: &Path) -> Result<PlaybackConfig>;

    /// Source de pistes (extensions configurées, interlude exclu)
    fn track_source(&self) -> Result<DirectoryTrackSource>;

    /// Capacité du canal de chaque auditeur
    fn listener_buffer(&self) -> Result<usize>;
}

impl RadioConfigExt for Config {
    fn radio_music_dir(&self) -> Result<PathBuf> {
        let dir = self
            .get_music_dir()
            .context("No music directory configured (radio.music_dir)")?;
        if !dir.is_dir() {
            return Err(crate::Error::InvalidMusicDir(dir).into());
        }
        Ok(dir)
    }

    fn scheduler_config(&self) -> Result<SchedulerConfig> {
        Ok(SchedulerConfig {
            album_chance: self.get_album_chance()?.clamp(0.0, 1.0),
            reshuffle_interval: Duration::from_secs(self.get_reshuffle_hours()? * 3600),
            max_reload_attempts: self.get_max_reload_attempts()?,
        })
    }

    fn encoder_config(&self) -> Result<EncoderConfig> {
        let bitrate = self.get_encoder_bitrate()?;
        let fade = self.get_fade_in_seconds()?;
        Ok(EncoderConfig {
            ffmpeg: PathBuf::from(self.get_ffmpeg_path()?),
            codec: self.get_encoder_codec()?,
            format: self.get_encoder_format()?,
            bitrate_kbps: u32::try_from(bitrate)
                .with_context(|| format!("Invalid encoder bitrate {}", bitrate))?,
            fade_in: (fade > 0).then(|| Duration::from_secs(fade)),
            realtime: true,
        })
    }

    fn pipeline_config(&self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            chunk_size: self.get_chunk_size()?.max(1),
            read_timeout: Duration::from_secs(self.get_read_timeout_secs()?.max(1)),
            max_stalls: self.get_max_stalls()?.max(1),
            stall_poll_interval: DEFAULT_STALL_POLL_INTERVAL,
            terminate_timeout: Duration::from_secs(self.get_terminate_timeout_secs()?),
        })
    }

    fn playback_config(&self, music_root: &Path) -> Result<PlaybackConfig> {
        let interlude = self.get_interlude()?;
        let interlude = interlude.trim();
        Ok(PlaybackConfig {
            interlude: (!interlude.is_empty()).then(|| music_root.join(interlude)),
            strip_metadata: self.get_strip_metadata()?,
            empty_backoff: Duration::from_secs(self.get_empty_backoff_secs()?),
            ..Default::default()
        })
    }

    fn track_source(&self) -> Result<DirectoryTrackSource> {
        let source = DirectoryTrackSource::new(self.get_extensions()?);
        let interlude = self.get_interlude()?;
        let interlude = interlude.trim();
        Ok(if interlude.is_empty() {
            source
        } else {
            source.excluding(interlude)
        })
    }

    fn listener_buffer(&self) -> Result<usize> {
        Ok(self.get_listener_buffer()?.max(1))
    }
}
