use net::RestartMode;
use tokio::sync::watch;

/// Sender half of the process exit signal.
///
/// Fired once by the lifecycle controller when a stop sequence is complete
/// and the process may terminate. Carries the mode so the launcher can tell
/// a reload from a full shutdown.
#[derive(Clone)]
pub struct ExitTx(watch::Sender<Option<RestartMode>>);

/// Receiver half. Clone it into every task that must exit with the server.
#[derive(Clone)]
pub struct ExitRx(watch::Receiver<Option<RestartMode>>);

pub fn exit_channel() -> (ExitTx, ExitRx) {
    let (tx, rx) = watch::channel(None);
    (ExitTx(tx), ExitRx(rx))
}

impl ExitTx {
    pub fn signal(&self, mode: RestartMode) {
        let _ = self.0.send(Some(mode));
    }
}

impl ExitRx {
    /// Wait until the exit signal fires and return its mode.
    ///
    /// Returns `None` if the sender was dropped without signalling.
    pub async fn wait(&mut self) -> Option<RestartMode> {
        loop {
            if let Some(mode) = *self.0.borrow_and_update() {
                return Some(mode);
            }
            if self.0.changed().await.is_err() {
                return *self.0.borrow();
            }
        }
    }

    pub fn signalled(&self) -> Option<RestartMode> {
        *self.0.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_signalled_mode() {
        let (tx, mut rx) = exit_channel();
        assert_eq!(rx.signalled(), None);
        tx.signal(RestartMode::Reload);
        assert_eq!(rx.wait().await, Some(RestartMode::Reload));
    }

    #[tokio::test]
    async fn late_receiver_sees_signal() {
        let (tx, rx) = exit_channel();
        tx.signal(RestartMode::Shutdown);
        let mut late = rx.clone();
        assert_eq!(late.wait().await, Some(RestartMode::Shutdown));
    }

    #[tokio::test]
    async fn dropped_sender_unblocks_wait() {
        let (tx, mut rx) = exit_channel();
        drop(tx);
        assert_eq!(rx.wait().await, None);
    }
}
