use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Stop request shared between the signal handler and the tick loop. The
/// flag is sticky: waiting after the request was made returns immediately.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
        info!("Shutdown signal received");
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
