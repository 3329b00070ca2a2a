use engine_core::{ExitRx, StopTx};
use net::RestartMode;
use tokio::task::JoinHandle;

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (all platforms).
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => { tracing::info!("Received SIGINT"); }
            _ = sigterm.recv() => { tracing::info!("Received SIGTERM"); }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C");
    }
    Ok(())
}

/// Turn every OS stop signal into a stop request in `mode` until the
/// server signals exit.
///
/// Repeated signals are forwarded as well; the controller ignores all but
/// the first.
pub fn forward_signals(mode: RestartMode, stop: StopTx, mut exit: ExitRx) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = wait_for_signal() => {
                    if let Err(e) = received {
                        tracing::error!(error = %e, "Signal handler registration failed");
                        return;
                    }
                    if stop.send(mode).is_err() {
                        return;
                    }
                }
                exited = exit.wait() => {
                    tracing::debug!(?exited, "Signal forwarding stopped");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::exit_channel;
    use std::time::Duration;

    #[tokio::test]
    async fn forwarding_ends_with_exit_signal() {
        let (stop_tx, _stop_rx) = tokio::sync::mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = exit_channel();
        let forwarder = forward_signals(RestartMode::Reload, stop_tx, exit_rx);

        exit_tx.signal(RestartMode::Shutdown);
        tokio::time::timeout(Duration::from_secs(1), forwarder)
            .await
            .unwrap()
            .unwrap();
    }
}
