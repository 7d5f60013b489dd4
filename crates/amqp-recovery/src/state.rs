//! Connection state tracking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Liveness of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable connection; the next operation connects first.
    Disconnected,

    /// A connection and its channel are open.
    Connected,
}

/// Shared view of a client's connection state.
///
/// Cloning is cheap; every clone observes the same client. The client updates
/// it when it opens or closes a connection and whenever it checks the one it
/// holds (before each operation, or through `is_connected` and `state`). A
/// connection the broker drops in between is still reported `Connected` here
/// until that next check.
#[derive(Clone)]
pub struct ConnectionStatus {
    connected: Arc<AtomicBool>,

    /// Number of channels opened so far; the current channel's generation.
    generation: Arc<AtomicU64>,

    /// Connections opened after the first one.
    reconnects: Arc<AtomicU64>,
}

impl ConnectionStatus {
    /// Creates a status in the `Disconnected` state.
    pub fn new() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Generation of the current channel; `0` before the first connect.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of times a connection replaced an earlier one.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Acquire)
    }

    /// Records a freshly opened connection and returns the new channel generation.
    pub(crate) fn mark_connected(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if generation > 1 {
            self.reconnects.fetch_add(1, Ordering::AcqRel);
        }
        self.connected.store(true, Ordering::Release);
        generation
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStatus")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("reconnects", &self.reconnects())
            .finish()
    }
}
