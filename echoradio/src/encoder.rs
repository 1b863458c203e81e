//! External encoder process
//!
//! The pipeline only sees the [`EncoderSpawner`] / [`EncoderProcess`]
//! traits; [`FfmpegSpawner`] is the production implementation.

use crate::track::Track;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Stderr lines kept for diagnostics
const STDERR_TAIL_LINES: usize = 32;

/// How an encoder process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn with_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn killed() -> Self {
        Self { code: None }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A running encoder, producing encoded bytes on its output
#[async_trait]
pub trait EncoderProcess: Send {
    /// Reads encoded bytes; `Ok(0)` means nothing is available (end of
    /// stream or nothing produced yet)
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Non-blocking exit check
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Asks the process to stop and waits for it, at most `timeout`
    ///
    /// Returns `Ok(None)` if the process is still alive after `timeout`.
    /// A process that is already gone is not an error.
    async fn terminate(&mut self, timeout: Duration) -> io::Result<Option<ProcessExit>>;

    /// Remaining diagnostic output (stderr lines)
    async fn diagnostics(&mut self) -> Vec<String>;
}

/// Launches one encoder per track
pub trait EncoderSpawner: Send + Sync {
    fn spawn(&self, track: &Track) -> io::Result<Box<dyn EncoderProcess>>;
}

/// Encoding parameters
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// ffmpeg binary (name looked up in `PATH`, or full path)
    pub ffmpeg: PathBuf,
    pub codec: String,
    pub format: String,
    pub bitrate_kbps: u32,
    /// Fade-in applied at the start of each track, `None` to disable
    pub fade_in: Option<Duration>,
    /// Read input at native frame rate (`-re`)
    pub realtime: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            codec: "libmp3lame".to_string(),
            format: "mp3".to_string(),
            bitrate_kbps: 128,
            fade_in: Some(Duration::from_secs(5)),
            realtime: true,
        }
    }
}

/// Spawns `ffmpeg`, writing the encoded stream to its stdout
#[derive(Debug, Clone, Default)]
pub struct FfmpegSpawner {
    config: EncoderConfig,
}

impl FfmpegSpawner {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Command line arguments for `track` (binary excluded)
    pub fn args(&self, track: &Track) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(OsString::from)
            .collect();

        if self.config.realtime {
            args.push("-re".into());
        }
        args.push("-i".into());
        args.push(track.path().as_os_str().to_owned());

        if let Some(fade) = self.config.fade_in.filter(|d| !d.is_zero()) {
            args.push("-af".into());
            args.push(format!("afade=t=in:ss=0:d={}", fade.as_secs_f64()).into());
        }

        args.push("-c:a".into());
        args.push(self.config.codec.clone().into());
        args.push("-b:a".into());
        args.push(format!("{}k", self.config.bitrate_kbps).into());
        args.push("-f".into());
        args.push(self.config.format.clone().into());
        args.push("-map_metadata".into());
        args.push("-1".into());
        args.push("pipe:1".into());
        args
    }
}

impl EncoderSpawner for FfmpegSpawner {
    fn spawn(&self, track: &Track) -> io::Result<Box<dyn EncoderProcess>> {
        let args = self.args(track);
        debug!("Spawning {} {:?}", self.config.ffmpeg.display(), args);

        let mut child = Command::new(&self.config.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("encoder stdout not captured"))?;
        let stderr = child.stderr.take();

        Ok(Box::new(FfmpegProcess::new(child, stdout, stderr)))
    }
}

/// A running `ffmpeg` child
pub struct FfmpegProcess {
    child: Child,
    stdout: ChildStdout,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl FfmpegProcess {
    fn new(child: Child, stdout: ChildStdout, stderr: Option<ChildStderr>) -> Self {
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        // stderr doit être vidé en continu sinon ffmpeg bloque quand le pipe est plein
        let stderr_task = stderr.map(|stderr| {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(target: "echoradio::ffmpeg", "{}", line);
                    let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                    if tail.len() >= STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        Self {
            child,
            stdout,
            stderr_tail,
            stderr_task,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf).await
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.child.try_wait()?.map(ProcessExit::from))
    }

    async fn terminate(&mut self, timeout: Duration) -> io::Result<Option<ProcessExit>> {
        if let Some(exit) = self.try_wait()? {
            return Ok(Some(exit));
        }

        match self.child.start_kill() {
            Ok(()) => {}
            // le processus s'est terminé entre-temps
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(Some(status?.into())),
            Err(_) => Ok(None),
        }
    }

    async fn diagnostics(&mut self) -> Vec<String> {
        if let Some(task) = self.stderr_task.take() {
            // stderr se ferme avec le processus ; on n'attend pas indéfiniment
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
        self.stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}
