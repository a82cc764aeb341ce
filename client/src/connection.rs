//! Process-wide "live channel available" signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Snapshot of the shared transport's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    pub live: bool,
    /// Bumped on every successful (re)connect, so observers that missed a
    /// short outage still notice the server dropped their subscriptions.
    pub generation: u64,
}

/// Shared connection state. Cloning yields another handle to the same signal;
/// every feed in the process observes the same transitions.
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    tx: Arc<watch::Sender<Link>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Link::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn is_connected(&self) -> bool {
        self.tx.borrow().live
    }

    pub fn link(&self) -> Link {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Link> {
        self.tx.subscribe()
    }

    /// Returns true if this call changed the state.
    pub fn mark_connected(&self) -> bool {
        self.tx.send_if_modified(|link| {
            if link.live {
                return false;
            }
            link.live = true;
            link.generation += 1;
            true
        })
    }

    /// Returns true if this call changed the state.
    pub fn mark_disconnected(&self) -> bool {
        self.tx.send_if_modified(|link| {
            if !link.live {
                return false;
            }
            link.live = false;
            true
        })
    }
}
