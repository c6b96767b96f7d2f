//! Connectivity monitor.
//!
//! An advisory "can the device reach the network" flag with change events.
//! "Online" does not mean the server answers: every remote call still has to
//! handle failure.

use std::sync::Arc;
use tokio::sync::watch;

/// A change of the online flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameOnline,
    BecameOffline,
}

/// Source of the online flag, injected into the engine and the gateway.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Transitions from now on.
    fn subscribe(&self) -> ConnectivityEvents;
}

/// Stream of [`Transition`]s. Repeated reports of the same state are not
/// transitions and are not yielded.
#[derive(Debug)]
pub struct ConnectivityEvents {
    rx: watch::Receiver<bool>,
    last: bool,
}

impl ConnectivityEvents {
    /// Wait for the next transition. `None` once the monitor is gone.
    pub async fn next(&mut self) -> Option<Transition> {
        loop {
            self.rx.changed().await.ok()?;
            let online = *self.rx.borrow_and_update();
            if online != self.last {
                self.last = online;
                return Some(if online {
                    Transition::BecameOnline
                } else {
                    Transition::BecameOffline
                });
            }
        }
    }
}

/// Connectivity flag fed by the platform signal through [`set_online`].
///
/// [`set_online`]: ConnectivityMonitor::set_online
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Report the platform's current state. Only actual changes notify.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }
}

impl Connectivity for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> ConnectivityEvents {
        let rx = self.tx.subscribe();
        let last = *rx.borrow();
        ConnectivityEvents { rx, last }
    }
}
