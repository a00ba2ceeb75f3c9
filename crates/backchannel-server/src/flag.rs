//! Event flag: a settable boolean that tasks can wait on.
//!
//! Backed by a `tokio::sync::watch` channel, so any number of tasks may wait
//! at once and each one observes the `set`.

use tokio::sync::watch;

/// A resettable signal shared between the code that observes an event and
/// the code waiting for it. Clones share state.
#[derive(Clone)]
pub struct EventFlag {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl EventFlag {
    /// Create a cleared flag.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Set the flag and wake every waiter. Idempotent.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Clear the flag. Tasks already woken are unaffected.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the flag is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // Sender lives in self, so the channel cannot close while we wait.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for EventFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFlag").field("set", &self.is_set()).finish()
    }
}
