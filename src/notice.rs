//! Transient, auto-dismissing notification.
//!
//! Only one message is visible at a time. A newer message replaces the
//! current one and restarts the countdown; a countdown belonging to a
//! replaced message never clears its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct Banner {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    message_tx: watch::Sender<Option<String>>,
    /// Bumped on every show/dismiss
    generation: AtomicU64,
    ttl: Duration,
}

impl Banner {
    pub fn new(ttl: Duration) -> Self {
        let (message_tx, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                message_tx,
                generation: AtomicU64::new(0),
                ttl,
            }),
        }
    }

    /// Show `message` until the TTL elapses. Must be called from within
    /// a tokio runtime.
    pub fn show(&self, message: impl Into<String>) {
        let message = message.into();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(%message, "Banner shown");
        self.inner.message_tx.send_replace(Some(message));

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.ttl).await;
            inner.message_tx.send_if_modified(|current| {
                if inner.generation.load(Ordering::SeqCst) != generation || current.is_none() {
                    return false;
                }

                *current = None;
                true
            });
        });
    }

    pub fn dismiss(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.message_tx.send_if_modified(|current| current.take().is_some());
    }

    pub fn current(&self) -> Option<String> {
        self.inner.message_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.inner.message_tx.subscribe()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }
}

impl Default for Banner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
