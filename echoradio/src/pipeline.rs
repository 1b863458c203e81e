//! Supervised transcoding of one track
//!
//! ```text
//! Idle → Spawning → Streaming → Draining → Terminated
//! ```
//!
//! A session always reaches `Terminated` in bounded time: every read is
//! guarded by a timeout, consecutive empty reads are counted, and the
//! encoder is killed if it is still alive when streaming ends.

use crate::broadcaster::Broadcaster;
use crate::encoder::{EncoderProcess, EncoderSpawner, ProcessExit};
use crate::error::{Error, Result};
use crate::track::Track;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_STALLS: usize = 10;
pub const DEFAULT_STALL_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum bytes read from the encoder at once
    pub chunk_size: usize,
    pub read_timeout: Duration,
    /// Consecutive empty or timed-out reads before the track is abandoned
    pub max_stalls: usize,
    /// Pause after an empty read while the encoder is still running
    pub stall_poll_interval: Duration,
    pub terminate_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_stalls: DEFAULT_MAX_STALLS,
            stall_poll_interval: DEFAULT_STALL_POLL_INTERVAL,
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Spawning,
    Streaming,
    Draining,
    Terminated,
}

/// How a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The encoder reached the end of the track and exited with code 0
    Completed,
    /// The relay was shut down while the track was playing
    TerminatedByCaller,
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub track: Track,
    pub disposition: Disposition,
    pub bytes: u64,
    pub chunks: u64,
    pub exit: Option<ProcessExit>,
    pub elapsed: Duration,
}

/// Why streaming stopped
enum StreamEnd {
    Exited(ProcessExit),
    Stalled(usize),
    Cancelled,
    ReadFailed(io::Error),
}

enum ReadEvent {
    Data(usize),
    Empty,
    TimedOut,
    Failed(io::Error),
    Cancelled,
}

/// Per-track bookkeeping
struct PipelineSession<'a> {
    track: &'a Track,
    state: PipelineState,
    started: Instant,
    bytes: u64,
    chunks: u64,
    stalls: usize,
}

impl<'a> PipelineSession<'a> {
    fn new(track: &'a Track) -> Self {
        Self {
            track,
            state: PipelineState::Idle,
            started: Instant::now(),
            bytes: 0,
            chunks: 0,
            stalls: 0,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("{}: {:?} → {:?}", self.track.display_name(), self.state, next);
        self.state = next;
    }

    fn report(&self, disposition: Disposition, exit: Option<ProcessExit>) -> SessionReport {
        SessionReport {
            track: self.track.clone(),
            disposition,
            bytes: self.bytes,
            chunks: self.chunks,
            exit,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Runs one encoder per track and feeds its output to the broadcaster
pub struct TranscodePipeline {
    spawner: Arc<dyn EncoderSpawner>,
    broadcaster: Arc<Broadcaster>,
    config: PipelineConfig,
}

impl TranscodePipeline {
    pub fn new(
        spawner: Arc<dyn EncoderSpawner>,
        broadcaster: Arc<Broadcaster>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            spawner,
            broadcaster,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Streams `track` to every listener until it ends, stalls, crashes or
    /// `cancel` fires
    pub async fn run(&self, track: &Track, cancel: &CancellationToken) -> Result<SessionReport> {
        let mut session = PipelineSession::new(track);

        session.transition(PipelineState::Spawning);
        let mut process = match self.spawner.spawn(track) {
            Ok(process) => process,
            Err(source) => {
                session.transition(PipelineState::Terminated);
                return Err(Error::Spawn {
                    track: track.path().to_path_buf(),
                    source,
                });
            }
        };

        session.transition(PipelineState::Streaming);
        let end = self.stream(&mut session, process.as_mut(), cancel).await;

        session.transition(PipelineState::Draining);
        let exit = self.drain(&end, process.as_mut()).await;
        let diagnostics = process.diagnostics().await;
        drop(process);
        session.transition(PipelineState::Terminated);

        let failed = !matches!(&end, StreamEnd::Exited(e) if e.success())
            && !matches!(end, StreamEnd::Cancelled);
        for line in diagnostics {
            if failed {
                warn!(target: "echoradio::ffmpeg", "{}", line);
            } else {
                debug!(target: "echoradio::ffmpeg", "{}", line);
            }
        }

        match end {
            StreamEnd::Exited(e) if e.success() => {
                debug!(
                    "Finished {} ({} bytes in {:?})",
                    track,
                    session.bytes,
                    session.started.elapsed()
                );
                Ok(session.report(Disposition::Completed, exit))
            }
            StreamEnd::Exited(e) => Err(Error::ProcessCrash {
                track: track.path().to_path_buf(),
                code: e.code,
            }),
            StreamEnd::ReadFailed(e) => {
                error!("Error reading encoder output for {}: {}", track, e);
                Err(Error::ProcessCrash {
                    track: track.path().to_path_buf(),
                    code: exit.and_then(|e| e.code),
                })
            }
            StreamEnd::Stalled(stalls) => Err(Error::Stall {
                track: track.path().to_path_buf(),
                stalls,
            }),
            StreamEnd::Cancelled => {
                info!("Stopped {} on request", track);
                Ok(session.report(Disposition::TerminatedByCaller, exit))
            }
        }
    }

    async fn stream(
        &self,
        session: &mut PipelineSession<'_>,
        process: &mut dyn EncoderProcess,
        cancel: &CancellationToken,
    ) -> StreamEnd {
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => ReadEvent::Cancelled,
                read = tokio::time::timeout(self.config.read_timeout, process.read_chunk(&mut buf)) => {
                    match read {
                        Ok(Ok(0)) => ReadEvent::Empty,
                        Ok(Ok(n)) => ReadEvent::Data(n),
                        Ok(Err(e)) => ReadEvent::Failed(e),
                        Err(_) => ReadEvent::TimedOut,
                    }
                }
            };

            match event {
                ReadEvent::Data(n) => {
                    session.stalls = 0;
                    session.bytes += n as u64;
                    session.chunks += 1;
                    self.broadcaster
                        .broadcast(Bytes::copy_from_slice(&buf[..n]))
                        .await;
                }
                ReadEvent::Empty => {
                    match process.try_wait() {
                        Ok(Some(exit)) => {
                            info!("Encoder for {} exited with code {:?}", session.track, exit.code);
                            return StreamEnd::Exited(exit);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Cannot poll encoder for {}: {}", session.track, e),
                    }

                    session.stalls += 1;
                    if session.stalls >= self.config.max_stalls {
                        warn!(
                            "Encoder stalled on {} ({} empty reads), skipping",
                            session.track, session.stalls
                        );
                        return StreamEnd::Stalled(session.stalls);
                    }

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return StreamEnd::Cancelled,
                        _ = tokio::time::sleep(self.config.stall_poll_interval) => {}
                    }
                }
                ReadEvent::TimedOut => {
                    session.stalls += 1;
                    debug!(
                        "No output from encoder for {} within {:?} ({}/{})",
                        session.track, self.config.read_timeout, session.stalls, self.config.max_stalls
                    );
                    if session.stalls >= self.config.max_stalls {
                        warn!(
                            "Encoder stalled on {} ({} timed-out reads), skipping",
                            session.track, session.stalls
                        );
                        return StreamEnd::Stalled(session.stalls);
                    }
                }
                ReadEvent::Failed(e) => return StreamEnd::ReadFailed(e),
                ReadEvent::Cancelled => return StreamEnd::Cancelled,
            }
        }
    }

    /// Makes sure the encoder is gone; returns its exit status when known
    async fn drain(&self, end: &StreamEnd, process: &mut dyn EncoderProcess) -> Option<ProcessExit> {
        if let StreamEnd::Exited(exit) = end {
            return Some(*exit);
        }

        match process.terminate(self.config.terminate_timeout).await {
            Ok(Some(exit)) => Some(exit),
            Ok(None) => {
                warn!(
                    "Encoder did not exit within {:?}, abandoning it",
                    self.config.terminate_timeout
                );
                None
            }
            Err(e) => {
                warn!("Failed to terminate encoder: {}", e);
                None
            }
        }
    }
}
