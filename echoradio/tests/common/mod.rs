//! Fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use echoradio::{
    EncoderProcess, EncoderSpawner, ListenerSink, ListenerWriteError, ProcessExit, Track,
    TrackSource,
};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One step of a scripted encoder
#[derive(Debug, Clone)]
pub enum Step {
    /// Produce these bytes
    Data(Vec<u8>),
    /// Read returns 0 bytes while the process keeps running
    Empty,
    /// Read never completes
    Hang,
    /// Read fails with an IO error
    Fail,
}

pub fn data(bytes: &[u8]) -> Step {
    Step::Data(bytes.to_vec())
}

/// Encoder following a fixed script
///
/// Once the script is exhausted, reads return 0 and the process reports
/// `exit` (or keeps running forever when `exit` is `None`).
pub struct ScriptedProcess {
    steps: VecDeque<Step>,
    exit: Option<ProcessExit>,
    terminated: Arc<AtomicBool>,
    killed: bool,
}

#[async_trait]
impl EncoderProcess for ScriptedProcess {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            Some(Step::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Step::Empty) | None => Ok(0),
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Fail) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")),
        }
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        if self.killed {
            return Ok(Some(ProcessExit::killed()));
        }
        if self.steps.is_empty() {
            return Ok(self.exit);
        }
        Ok(None)
    }

    async fn terminate(&mut self, _timeout: Duration) -> io::Result<Option<ProcessExit>> {
        self.terminated.store(true, Ordering::SeqCst);
        self.killed = true;
        Ok(Some(ProcessExit::killed()))
    }

    async fn diagnostics(&mut self) -> Vec<String> {
        vec!["scripted encoder".to_string()]
    }
}

/// Spawner handing out [`ScriptedProcess`]es
pub struct ScriptedSpawner {
    steps: Vec<Step>,
    exit: Option<ProcessExit>,
    fail_spawn: bool,
    pub spawned: Arc<Mutex<Vec<PathBuf>>>,
    pub terminated: Arc<AtomicBool>,
}

impl ScriptedSpawner {
    /// Produces `steps` then exits with `code`
    pub fn exiting(steps: Vec<Step>, code: i32) -> Self {
        Self::new(steps, Some(ProcessExit::with_code(code)), false)
    }

    /// Produces `steps` then stays alive without output
    pub fn running(steps: Vec<Step>) -> Self {
        Self::new(steps, None, false)
    }

    /// Every spawn fails
    pub fn broken() -> Self {
        Self::new(Vec::new(), None, true)
    }

    fn new(steps: Vec<Step>, exit: Option<ProcessExit>, fail_spawn: bool) -> Self {
        Self {
            steps,
            exit,
            fail_spawn,
            spawned: Arc::new(Mutex::new(Vec::new())),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn spawned(&self) -> Vec<PathBuf> {
        self.spawned.lock().unwrap().clone()
    }
}

impl EncoderSpawner for ScriptedSpawner {
    fn spawn(&self, track: &Track) -> io::Result<Box<dyn EncoderProcess>> {
        self.spawned.lock().unwrap().push(track.path().to_path_buf());
        if self.fail_spawn {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such encoder"));
        }
        Ok(Box::new(ScriptedProcess {
            steps: self.steps.iter().cloned().collect(),
            exit: self.exit,
            terminated: self.terminated.clone(),
            killed: false,
        }))
    }
}

/// Sink keeping every chunk it receives
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub received: Arc<Mutex<Vec<Bytes>>>,
}

impl RecordingSink {
    pub fn chunks(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl ListenerSink for RecordingSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), ListenerWriteError> {
        self.received.lock().unwrap().push(chunk);
        Ok(())
    }
}

/// Sink accepting `accept` writes, then failing
#[derive(Clone)]
pub struct FailingSink {
    accept: usize,
    pub attempts: Arc<AtomicUsize>,
    pub received: Arc<Mutex<Vec<Bytes>>>,
}

impl FailingSink {
    pub fn after(accept: usize) -> Self {
        Self {
            accept,
            attempts: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListenerSink for FailingSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), ListenerWriteError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.accept {
            return Err(ListenerWriteError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        self.received.lock().unwrap().push(chunk);
        Ok(())
    }
}

/// Track source with fixed pools, counting discoveries
#[derive(Clone, Default)]
pub struct FixedSource {
    pub general: Vec<Track>,
    pub album: Vec<Track>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedSource {
    pub fn new(general: usize, album: usize) -> Self {
        Self {
            general: (0..general)
                .map(|i| Track::general(format!("/music/track-{i}.mp3")))
                .collect(),
            album: (0..album)
                .map(|i| Track::album(format!("/music/Album/track-{i}.mp3")))
                .collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TrackSource for FixedSource {
    fn discover(&self, _root: &Path) -> (Vec<Track>, Vec<Track>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.general.clone(), self.album.clone())
    }
}

pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, b"").unwrap();
}
