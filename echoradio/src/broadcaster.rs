//! Fan-out of the encoded stream to every connected listener
//!
//! The listener set lives behind a single async mutex: registration,
//! removal and a full broadcast pass never overlap. A listener whose write
//! fails is dropped at the end of the pass, never retried.

use crate::error::ListenerWriteError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

/// Default number of chunks buffered per listener
pub const DEFAULT_LISTENER_BUFFER: usize = 32;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocates a fresh, process-unique id
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Writable byte sink of one client
#[async_trait]
pub trait ListenerSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), ListenerWriteError>;
}

/// Listener backed by a bounded channel
///
/// The receiving half becomes the HTTP response body. Once the client is
/// gone the receiver is dropped and the next write fails.
pub struct ChannelListener {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelListener {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ListenerSink for ChannelListener {
    async fn write(&mut self, chunk: Bytes) -> Result<(), ListenerWriteError> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| ListenerWriteError::Disconnected)
    }
}

/// The set of connected listeners
pub struct Broadcaster {
    listeners: Mutex<HashMap<ListenerId, Box<dyn ListenerSink>>>,
    listener_buffer: usize,
    closed: AtomicBool,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_LISTENER_BUFFER)
    }
}

impl Broadcaster {
    /// `listener_buffer` is the channel capacity used by [`subscribe`](Self::subscribe)
    pub fn new(listener_buffer: usize) -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            listener_buffer: listener_buffer.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Adds a listener; returns `false` (and drops `sink`) if `id` is already
    /// registered or the broadcaster is closed
    pub async fn register(&self, id: ListenerId, sink: Box<dyn ListenerSink>) -> bool {
        let mut listeners = self.listeners.lock().await;
        if self.is_closed() || listeners.contains_key(&id) {
            return false;
        }
        listeners.insert(id, sink);
        info!("🎧 Listener {} connected ({} total)", id, listeners.len());
        true
    }

    /// Removes a listener; returns whether it was present
    pub async fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().await;
        let removed = listeners.remove(&id).is_some();
        if removed {
            info!("Listener {} left ({} remaining)", id, listeners.len());
        }
        removed
    }

    /// Writes `chunk` to every registered listener
    ///
    /// Listeners that fail are removed once the pass is over. Returns the
    /// number of listeners that received the chunk.
    pub async fn broadcast(&self, chunk: Bytes) -> usize {
        let mut listeners = self.listeners.lock().await;
        let mut failed = Vec::new();

        for (id, sink) in listeners.iter_mut() {
            if let Err(e) = sink.write(chunk.clone()).await {
                match e {
                    ListenerWriteError::Disconnected | ListenerWriteError::Cancelled => {
                        info!("Listener {} disconnected", id)
                    }
                    ListenerWriteError::Io(ref err) => {
                        error!("Unexpected error writing to listener {}: {}", id, err)
                    }
                }
                failed.push(*id);
            }
        }

        for id in &failed {
            listeners.remove(id);
        }

        listeners.len()
    }

    /// Drops every listener and refuses new ones
    ///
    /// Channel listeners see the end of their stream, so open HTTP bodies
    /// finish once the relay stops.
    pub async fn close(&self) {
        let mut listeners = self.listeners.lock().await;
        self.closed.store(true, Ordering::Release);
        let count = listeners.len();
        listeners.clear();
        info!("Broadcaster closed, {} listener(s) released", count);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.lock().await.len()
    }

    pub async fn contains(&self, id: ListenerId) -> bool {
        self.listeners.lock().await.contains_key(&id)
    }

    /// Registers a new [`ChannelListener`]
    ///
    /// The returned guard unregisters the listener when dropped.
    pub async fn subscribe(self: &Arc<Self>) -> (ListenerGuard, mpsc::Receiver<Bytes>) {
        let id = ListenerId::next();
        let (sink, rx) = ChannelListener::new(self.listener_buffer);
        self.register(id, Box::new(sink)).await;
        (
            ListenerGuard {
                id,
                broadcaster: self.clone(),
            },
            rx,
        )
    }
}

/// Unregisters its listener on drop
pub struct ListenerGuard {
    id: ListenerId,
    broadcaster: Arc<Broadcaster>,
}

impl ListenerGuard {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let id = self.id;
        let broadcaster = self.broadcaster.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    broadcaster.unregister(id).await;
                });
            }
            Err(_) => debug!("No runtime to unregister listener {}", id),
        }
    }
}
