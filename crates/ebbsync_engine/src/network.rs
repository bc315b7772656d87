//! Network status tracking.

use std::sync::atomic::{AtomicBool, Ordering};

/// A change of connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTransition {
    /// Offline to online.
    WentOnline,
    /// Online to offline.
    WentOffline,
}

/// Tracks whether the remote store is reachable.
///
/// Only edges matter: repeating the current state reports no transition.
#[derive(Debug)]
pub struct NetworkMonitor {
    online: AtomicBool,
}

impl NetworkMonitor {
    /// Creates a monitor in the given state.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records a connectivity signal and returns the transition it caused.
    pub fn set(&self, online: bool) -> Option<NetworkTransition> {
        let previous = self.online.swap(online, Ordering::SeqCst);
        match (previous, online) {
            (false, true) => Some(NetworkTransition::WentOnline),
            (true, false) => Some(NetworkTransition::WentOffline),
            _ => None,
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
