//! Process signals to cancellation.
//!
//! SIGINT, SIGHUP, SIGTERM and SIGQUIT all cancel the same root token.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Install the signal handlers and cancel `cancel` on the first signal.
///
/// Handler installation errors are returned before anything is spawned.
#[cfg(unix)]
pub fn spawn_signal_handler(cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    Ok(tokio::spawn(async move {
        let received = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = hangup.recv() => "SIGHUP",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
            _ = cancel.cancelled() => return,
        };
        info!(signal = received, "shutdown signal received");
        cancel.cancel();
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_handler(cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                    return;
                }
            }
            _ = cancel.cancelled() => return,
        }
        info!(signal = "ctrl-c", "shutdown signal received");
        cancel.cancel();
    }))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_handler_exits_when_token_cancelled_elsewhere() {
        let cancel = CancellationToken::new();
        let handle = spawn_signal_handler(cancel.clone()).unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
