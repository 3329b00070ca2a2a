use async_trait::async_trait;
use session::{ServerSession, SessionId};
use tokio::sync::mpsc;

use crate::error::PortalError;
use crate::protocol::PortalToServer;

/// Sender feeding Portal messages into the lifecycle loop.
pub type PortalTx = mpsc::UnboundedSender<PortalToServer>;
/// Receiver drained by the lifecycle loop.
pub type PortalRx = mpsc::UnboundedReceiver<PortalToServer>;

/// The Server's side of the Portal Synchronization Channel.
#[async_trait]
pub trait PortalChannel: Send + Sync {
    /// False once the Portal end has gone away.
    fn is_connected(&self) -> bool;

    /// Push the Server's session mirror back to the Portal and wait for
    /// its acknowledgement.
    async fn sync_sessions(&self, sessions: Vec<ServerSession>) -> Result<(), PortalError>;

    fn disconnect_session(&self, session_id: SessionId, reason: &str) -> Result<(), PortalError>;

    /// Ask the Portal process to exit too.
    fn request_portal_shutdown(&self) -> Result<(), PortalError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RestartMode;

    #[tokio::test]
    async fn inbound_channel_roundtrip() {
        let (tx, mut rx): (PortalTx, PortalRx) = mpsc::unbounded_channel();
        tx.send(PortalToServer::SyncSessions { sessions: vec![] }).unwrap();
        tx.send(PortalToServer::ServerReady { mode: Some(RestartMode::Reset) }).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), PortalToServer::SyncSessions { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PortalToServer::ServerReady { mode: Some(RestartMode::Reset) }
        ));
    }
}
