use async_trait::async_trait;
use session::{ServerSession, SessionId};
use tokio::sync::{mpsc, oneshot};

use crate::channels::{PortalChannel, PortalRx, PortalTx};
use crate::error::PortalError;
use crate::protocol::PortalToServer;

/// Server → Portal traffic on the in-process link.
#[derive(Debug)]
pub enum Outbound {
    SyncSessions {
        sessions: Vec<ServerSession>,
        ack: oneshot::Sender<()>,
    },
    DisconnectSession {
        session_id: SessionId,
        reason: String,
    },
    ShutdownPortal,
}

/// What the Portal end observed, with acks already answered.
#[derive(Debug, Clone, PartialEq)]
pub enum PortalEvent {
    Synced(Vec<ServerSession>),
    Disconnect { session_id: SessionId, reason: String },
    ShutdownRequested,
}

/// [`PortalChannel`] over in-process tokio channels.
pub struct PortalLink {
    outbound: mpsc::UnboundedSender<Outbound>,
}

#[async_trait]
impl PortalChannel for PortalLink {
    fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }

    async fn sync_sessions(&self, sessions: Vec<ServerSession>) -> Result<(), PortalError> {
        let (ack, acked) = oneshot::channel();
        self.outbound
            .send(Outbound::SyncSessions { sessions, ack })
            .map_err(|_| PortalError::Disconnected)?;
        acked.await.map_err(|_| PortalError::Disconnected)
    }

    fn disconnect_session(&self, session_id: SessionId, reason: &str) -> Result<(), PortalError> {
        self.outbound
            .send(Outbound::DisconnectSession {
                session_id,
                reason: reason.to_string(),
            })
            .map_err(|_| PortalError::Disconnected)
    }

    fn request_portal_shutdown(&self) -> Result<(), PortalError> {
        self.outbound
            .send(Outbound::ShutdownPortal)
            .map_err(|_| PortalError::Disconnected)
    }
}

/// The Portal's end of an in-process link.
pub struct PortalEnd {
    pub inbound: PortalTx,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl PortalEnd {
    pub fn send(&self, msg: PortalToServer) -> Result<(), PortalError> {
        self.inbound.send(msg).map_err(|_| PortalError::Disconnected)
    }

    /// Wait for the next Server message, acknowledging syncs.
    pub async fn respond(&mut self) -> Option<PortalEvent> {
        let event = match self.outbound.recv().await? {
            Outbound::SyncSessions { sessions, ack } => {
                let _ = ack.send(());
                PortalEvent::Synced(sessions)
            }
            Outbound::DisconnectSession { session_id, reason } => {
                PortalEvent::Disconnect { session_id, reason }
            }
            Outbound::ShutdownPortal => PortalEvent::ShutdownRequested,
        };
        Some(event)
    }

    /// Answer every Server message until the link closes and return what
    /// was seen, in order.
    pub async fn respond_until_closed(mut self) -> Vec<PortalEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.respond().await {
            events.push(event);
        }
        events
    }
}

/// Build a connected in-process link.
pub fn portal_pair() -> (PortalLink, PortalRx, PortalEnd) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        PortalLink {
            outbound: outbound_tx,
        },
        inbound_rx,
        PortalEnd {
            inbound: inbound_tx,
            outbound: outbound_rx,
        },
    )
}
