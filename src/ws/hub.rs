use crate::models::SessionMessage;
use crate::services::FileRegistry;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Outbound frames a browser peer may have in flight before it is considered
/// too slow to live.
pub const PEER_QUEUE_CAPACITY: usize = 64;

/// How long a save waits for the client program to answer.
pub const SAVE_RESULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub already exists for room: {0}")]
    AlreadyExists(String),
    #[error("no session connection available")]
    SessionGone,
    #[error("timeout waiting for client response")]
    SaveTimeout,
    #[error("save rejected by client: {0}")]
    SaveRejected(String),
}

#[derive(Debug, Clone)]
struct SaveResult {
    success: bool,
    reason: Option<String>,
}

/// Single-slot rendezvous between the HTTP save path and the session socket
/// reader. Allocated lazily on first use.
#[derive(Debug)]
struct SaveSlot {
    tx: mpsc::Sender<SaveResult>,
    rx: Mutex<mpsc::Receiver<SaveResult>>,
}

/// One browser connection in a room.
///
/// The peer owns a bounded outbound queue drained by a background writer; the
/// hub owns the peer. The back-reference to the hub is non-owning so a peer
/// closing after hub teardown is still safe.
#[derive(Debug)]
pub struct EditingPeer {
    id: u64,
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    hub: Weak<EditingHub>,
}

impl EditingPeer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Try to put a frame on the outbound queue without blocking.
    async fn offer(&self, frame: Vec<u8>) -> Result<(), mpsc::error::TrySendError<Vec<u8>>> {
        let tx = self.tx.lock().await;
        match tx.as_ref() {
            Some(tx) => tx.try_send(frame),
            None => Err(mpsc::error::TrySendError::Closed(frame)),
        }
    }

    /// Close once: drop the queue (which ends the writer and closes the
    /// socket) and deregister from the hub.
    pub async fn close(&self) {
        let taken = self.tx.lock().await.take();
        if taken.is_none() {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove_peer(self.id).await;
        }
        debug!(peer = self.id, "editing peer closed");
    }
}

/// Per-file fan-out coordinator between the browser peers and the client
/// program's session socket.
#[derive(Debug)]
pub struct EditingHub {
    id: String,
    clients: Mutex<HashMap<u64, Arc<EditingPeer>>>,
    session_tx: Mutex<Option<mpsc::Sender<Message>>>,
    save_slot: Mutex<Option<Arc<SaveSlot>>>,
    last_active: Mutex<Instant>,
    next_peer_id: AtomicU64,
    closed: AtomicBool,
    files: Arc<FileRegistry>,
}

impl EditingHub {
    /// A hub exists only once the client program has connected its session
    /// socket; `session_tx` feeds that socket's write pump.
    pub fn new(id: &str, session_tx: mpsc::Sender<Message>, files: Arc<FileRegistry>) -> Self {
        Self {
            id: id.to_string(),
            clients: Mutex::new(HashMap::new()),
            session_tx: Mutex::new(Some(session_tx)),
            save_slot: Mutex::new(None),
            last_active: Mutex::new(Instant::now()),
            next_peer_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            files,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a browser socket: split off its sink behind a bounded queue
    /// with a background writer, and hand back the peer.
    pub async fn add_client(
        self: &Arc<Self>,
        sink: SplitSink<WebSocket, Message>,
    ) -> Arc<EditingPeer> {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(PEER_QUEUE_CAPACITY);
        tokio::spawn(peer_write_pump(sink, rx));
        self.add_peer_sender(tx).await
    }

    /// Register a peer around an existing queue sender. The write pump is the
    /// caller's business; broadcast and eviction behave identically.
    pub async fn add_peer_sender(self: &Arc<Self>, tx: mpsc::Sender<Vec<u8>>) -> Arc<EditingPeer> {
        let peer = Arc::new(EditingPeer {
            id: self.next_peer_id.fetch_add(1, Ordering::Relaxed),
            tx: Mutex::new(Some(tx)),
            hub: Arc::downgrade(self),
        });
        let mut clients = self.clients.lock().await;
        clients.insert(peer.id, peer.clone());
        peer
    }

    async fn remove_peer(&self, id: u64) {
        let mut clients = self.clients.lock().await;
        clients.remove(&id);
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_active.lock().await.elapsed()
    }

    async fn touch(&self) {
        *self.last_active.lock().await = Instant::now();
    }

    /// Fan a binary frame out to every peer except the sender.
    ///
    /// The peer set is snapshotted under the lock and the enqueues run in
    /// their own tasks so no peer can stall another. A full queue marks the
    /// peer as too slow: the frame is dropped and the peer evicted.
    pub async fn broadcast_message(&self, frame: Vec<u8>, sender: Option<u64>) {
        self.touch().await;
        let peers: Vec<Arc<EditingPeer>> = {
            let clients = self.clients.lock().await;
            clients.values().cloned().collect()
        };
        for peer in peers {
            if Some(peer.id) == sender {
                continue;
            }
            let frame = frame.clone();
            tokio::spawn(async move {
                match peer.offer(frame).await {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(peer = peer.id, "peer send queue full, dropping peer");
                        peer.close().await;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(peer = peer.id, "dropped frame for closed peer");
                    }
                }
            });
        }
    }

    /// Push a `save` message to the client program over the session socket.
    pub async fn notify_session_save(&self, content: &str) -> Result<(), HubError> {
        self.touch().await;
        let msg = SessionMessage::Save {
            content: content.to_string(),
        };
        let text = match serde_json::to_string(&msg) {
            Ok(text) => text,
            Err(e) => {
                error!(room = %self.id, err = %e, "failed to encode save message");
                return Err(HubError::SessionGone);
            }
        };
        let tx = self.session_tx.lock().await;
        match tx.as_ref() {
            Some(tx) => tx
                .send(Message::Text(text))
                .await
                .map_err(|_| HubError::SessionGone),
            None => Err(HubError::SessionGone),
        }
    }

    /// Offer a save result from the session socket reader. Non-blocking: if a
    /// result is already pending it is someone's stale answer and is dropped.
    pub async fn handle_save_result(&self, success: bool, reason: Option<String>) {
        let slot = self.save_slot().await;
        if slot.tx.try_send(SaveResult { success, reason }).is_err() {
            debug!(room = %self.id, "dropping stale save result");
        }
    }

    /// Block until the client program answers the pending save, up to the
    /// fixed deadline.
    pub async fn wait_save_result(&self) -> Result<(), HubError> {
        let slot = self.save_slot().await;
        let mut rx = slot.rx.lock().await;
        match tokio::time::timeout(SAVE_RESULT_TIMEOUT, rx.recv()).await {
            Ok(Some(result)) if result.success => Ok(()),
            Ok(Some(result)) => Err(HubError::SaveRejected(
                result.reason.unwrap_or_else(|| "unknown reason".to_string()),
            )),
            Ok(None) => Err(HubError::SessionGone),
            Err(_) => Err(HubError::SaveTimeout),
        }
    }

    async fn save_slot(&self) -> Arc<SaveSlot> {
        let mut slot = self.save_slot.lock().await;
        match slot.as_ref() {
            Some(slot) => slot.clone(),
            None => {
                let (tx, rx) = mpsc::channel(1);
                let created = Arc::new(SaveSlot {
                    tx,
                    rx: Mutex::new(rx),
                });
                *slot = Some(created.clone());
                created
            }
        }
    }

    /// Tear the hub down: close every peer, close the session socket, and
    /// delete the staged file from the registry. Safe to call repeatedly; a
    /// teardown may race the idle reaper.
    pub async fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let peers: Vec<Arc<EditingPeer>> = {
            let mut clients = self.clients.lock().await;
            clients.drain().map(|(_, peer)| peer).collect()
        };
        for peer in peers {
            peer.close().await;
        }
        // dropping the sender ends the session write pump, which closes the socket
        self.session_tx.lock().await.take();
        if self.files.remove(&self.id).await {
            info!(fileid = %self.id, "cleaned up session files");
        }
    }
}

/// Drain a peer's queue into its socket. Ends when the peer is closed or the
/// socket write fails, then closes the socket.
async fn peer_write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(Message::Binary(frame)).await {
            error!(err = %e, "client write error");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Drain the session queue into the client program's socket.
pub async fn session_write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = sink.send(msg).await {
            error!(err = %e, "session write error");
            break;
        }
    }
    let _ = sink.close().await;
}
