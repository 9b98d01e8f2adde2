// ABOUTME: Operator abort signalling for a running release attempt.
// ABOUTME: In-process watch channel, fed by Ctrl+C/SIGTERM or an abort marker in the store.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::types::AttemptId;

use super::store::AttemptStore;

/// Raises the abort flag.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes the abort flag. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

pub fn abort_channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx: Arc::new(tx) }, AbortSignal { rx })
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Abort on Ctrl+C or SIGTERM.
    pub fn abort_on_signal(&self) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Failed to install Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut signal) => {
                        signal.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::info!("Received Ctrl+C, aborting release"),
                _ = terminate => tracing::info!("Received SIGTERM, aborting release"),
            }
            handle.abort();
        })
    }

    /// Abort when `release abort <id>` leaves a marker in the store.
    pub fn abort_on_marker(
        &self,
        store: AttemptStore,
        attempt_id: AttemptId,
        poll: Duration,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                ticker.tick().await;
                if store.abort_requested(attempt_id) {
                    tracing::info!("Abort requested for attempt {}", attempt_id);
                    handle.abort();
                    return;
                }
            }
        })
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        abort_channel().1
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once an abort is requested; pends forever if every handle is dropped.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|aborted| *aborted).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
