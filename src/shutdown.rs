use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Stops the scheduler actor, the settings watcher and the signal loop together.
///
/// A subscriber that starts listening after `shutdown()` was called still
/// observes it through [`ShutdownCoordinator::wait`].
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raw receiver; only sees signals sent after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal every subscriber. Idempotent.
    pub fn shutdown(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested, including before this call.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = rx.recv().await;
    }

    pub fn has_subscribers(&self) -> bool {
        self.shutdown_tx.receiver_count() > 0
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_wait_resolves_after_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = coordinator.clone();

        let task = tokio::spawn(async move {
            waiter.wait().await;
            "stopped"
        });

        tokio::task::yield_now().await;
        coordinator.shutdown();

        let result = timeout(Duration::from_millis(100), task).await;
        assert_eq!(result.unwrap().unwrap(), "stopped");
    }

    #[tokio::test]
    async fn test_late_waiter_sees_earlier_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();

        let result = timeout(Duration::from_millis(100), coordinator.wait()).await;
        assert!(result.is_ok());
        assert!(coordinator.is_shutdown());
    }

    #[test]
    fn test_shutdown_is_sent_once() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();
        assert!(coordinator.has_subscribers());

        coordinator.shutdown();
        coordinator.clone().shutdown();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
