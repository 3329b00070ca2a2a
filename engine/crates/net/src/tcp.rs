use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use session::{ServerSession, SessionId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::channels::{PortalChannel, PortalRx};
use crate::error::PortalError;
use crate::protocol::{PortalToServer, ServerToPortal};

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<()>>>>;

/// [`PortalChannel`] speaking newline-delimited JSON over TCP.
pub struct TcpPortalLink {
    writer: mpsc::UnboundedSender<String>,
    pending: PendingAcks,
    next_request: AtomicU64,
    connected: Arc<AtomicBool>,
}

impl TcpPortalLink {
    /// Connect to the Portal listener. Inbound messages other
    /// than acks are forwarded to the returned receiver.
    pub async fn connect(addr: &str) -> Result<(Self, PortalRx), PortalError> {
        let stream = TcpStream::connect(addr).await?;
        tracing::info!(%addr, "Connected to portal");
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> (Self, PortalRx) {
        let (reader, mut writer) = stream.into_split();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(async move {
            while let Some(line) = write_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_connected = connected.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Portal read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<PortalToServer>(&line) {
                    Ok(PortalToServer::Ack { request_id }) => {
                        let waiter = reader_pending
                            .lock()
                            .ok()
                            .and_then(|mut pending| pending.remove(&request_id));
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(());
                        }
                    }
                    Ok(msg) => {
                        if inbound_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Malformed portal message ignored"),
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            // Dropping the waiters fails every outstanding sync.
            if let Ok(mut pending) = reader_pending.lock() {
                pending.clear();
            }
            tracing::warn!("Portal connection closed");
        });

        (
            Self {
                writer: write_tx,
                pending,
                next_request: AtomicU64::new(1),
                connected,
            },
            inbound_rx,
        )
    }

    fn send(&self, msg: &ServerToPortal) -> Result<(), PortalError> {
        let line = serde_json::to_string(msg)?;
        self.writer.send(line).map_err(|_| PortalError::Disconnected)
    }
}

struct PendingGuard<'a> {
    pending: &'a PendingAcks,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.request_id);
        }
    }
}

impl TcpPortalLink {
    /// Syncs still waiting for an ack.
    pub fn pending_acks(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait]
impl PortalChannel for TcpPortalLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.writer.is_closed()
    }

    async fn sync_sessions(&self, sessions: Vec<ServerSession>) -> Result<(), PortalError> {
        if !self.is_connected() {
            return Err(PortalError::Disconnected);
        }
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (ack, acked) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| PortalError::Disconnected)?
            .insert(request_id, ack);
        // Removes the waiter on every exit path, including a cancelled await.
        let _pending = PendingGuard {
            pending: &self.pending,
            request_id,
        };

        self.send(&ServerToPortal::SyncSessions {
            request_id,
            sessions,
        })?;
        acked.await.map_err(|_| PortalError::Disconnected)
    }

    fn disconnect_session(&self, session_id: SessionId, reason: &str) -> Result<(), PortalError> {
        self.send(&ServerToPortal::DisconnectSession {
            session_id,
            reason: reason.to_string(),
        })
    }

    fn request_portal_shutdown(&self) -> Result<(), PortalError> {
        self.send(&ServerToPortal::ShutdownPortal)
    }
}
