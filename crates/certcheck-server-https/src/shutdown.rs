//! Broadcast shutdown signal shared by every listener
//!
//! Triggering is one-shot and idempotent. Listeners that subscribe or poll after the
//! trigger still observe it, and dropping the [`Shutdown`] handle counts as a trigger.

use tokio::sync::watch;

/// Trigger side of the shutdown signal
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Create a listener for this signal
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Returns `false` if it had already been fired.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered or the trigger side is gone
    pub async fn wait(&mut self) {
        // Err means the sender was dropped, which is a shutdown as well
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}
