//! Events emitted by the client for observability.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::classifier::ErrorKind;

/// Something that happened to a client's connection or operations.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A connection and channel were opened.
    Connected {
        client: String,
        timestamp: Instant,
        generation: u64,
    },
    /// The connection was closed; `already_closed` when it had failed beforehand.
    Disconnected {
        client: String,
        timestamp: Instant,
        already_closed: bool,
    },
    /// An operation failed with a recoverable error and the client is reconnecting.
    Recovering {
        client: String,
        timestamp: Instant,
        operation: &'static str,
        kind: ErrorKind,
        attempt: usize,
    },
    /// The broker rejected an operation; it was not retried.
    Rejected {
        client: String,
        timestamp: Instant,
        operation: &'static str,
    },
    /// An operation completed, possibly after recoveries.
    Succeeded {
        client: String,
        timestamp: Instant,
        operation: &'static str,
        attempts: usize,
    },
    /// Consumers were registered and the consume loop started.
    ConsumerStarted {
        client: String,
        timestamp: Instant,
        queues: Vec<String>,
        prefetch: u16,
    },
    /// The consume loop returned, by cancellation or because the broker
    /// cancelled every consumer.
    ConsumerStopped {
        client: String,
        timestamp: Instant,
        deliveries: u64,
        cancelled: bool,
    },
}

impl ClientEvent {
    /// Returns the type of event, e.g. `"Recovering"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::Connected { .. } => "Connected",
            ClientEvent::Disconnected { .. } => "Disconnected",
            ClientEvent::Recovering { .. } => "Recovering",
            ClientEvent::Rejected { .. } => "Rejected",
            ClientEvent::Succeeded { .. } => "Succeeded",
            ClientEvent::ConsumerStarted { .. } => "ConsumerStarted",
            ClientEvent::ConsumerStopped { .. } => "ConsumerStopped",
        }
    }

    /// Returns when the event occurred.
    pub fn timestamp(&self) -> Instant {
        match self {
            ClientEvent::Connected { timestamp, .. }
            | ClientEvent::Disconnected { timestamp, .. }
            | ClientEvent::Recovering { timestamp, .. }
            | ClientEvent::Rejected { timestamp, .. }
            | ClientEvent::Succeeded { timestamp, .. }
            | ClientEvent::ConsumerStarted { timestamp, .. }
            | ClientEvent::ConsumerStopped { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the name of the client that emitted the event.
    pub fn client_name(&self) -> &str {
        match self {
            ClientEvent::Connected { client, .. }
            | ClientEvent::Disconnected { client, .. }
            | ClientEvent::Recovering { client, .. }
            | ClientEvent::Rejected { client, .. }
            | ClientEvent::Succeeded { client, .. }
            | ClientEvent::ConsumerStarted { client, .. }
            | ClientEvent::ConsumerStopped { client, .. } => client,
        }
    }
}

/// Receives client events.
pub trait EventListener: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &ClientEvent);
}

/// A collection of event listeners.
#[derive(Clone, Default)]
pub struct EventListeners {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventListeners {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Delivers `event` to every listener.
    ///
    /// A panicking listener does not prevent the remaining listeners from
    /// being called, nor does it unwind into the client.
    pub fn emit(&self, event: &ClientEvent) {
        for listener in &self.listeners {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
        }
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// A closure-backed event listener.
pub struct FnListener<F> {
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&ClientEvent) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&ClientEvent) + Send + Sync,
{
    fn on_event(&self, event: &ClientEvent) {
        (self.f)(event)
    }
}
