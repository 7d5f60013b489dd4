//! Client configuration and its builder.

use crate::classifier::ErrorKind;
use crate::events::{ClientEvent, EventListener, EventListeners, FnListener};

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) name: String,
    pub(crate) consumer_tag_prefix: String,
    pub(crate) requeue_on_nack: bool,
    pub(crate) event_listeners: EventListeners,
}

impl ClientConfig {
    /// Creates a new builder with defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Name used in events, logs and metric labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefix of the consumer tags registered by `pull`.
    pub fn consumer_tag_prefix(&self) -> &str {
        &self.consumer_tag_prefix
    }

    /// Whether `nack` asks the broker to requeue the message.
    pub fn requeue_on_nack(&self) -> bool {
        self.requeue_on_nack
    }

    pub(crate) fn emit(&self, event: &ClientEvent) {
        self.event_listeners.emit(event);
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfigBuilder::new().build()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    name: String,
    consumer_tag_prefix: String,
    requeue_on_nack: bool,
    event_listeners: EventListeners,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - name: `"<unnamed>"`
    /// - consumer_tag_prefix: `"amqp-recovery"`
    /// - requeue_on_nack: `true`
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            consumer_tag_prefix: "amqp-recovery".to_string(),
            requeue_on_nack: true,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name for this client (used in events, logs and metrics).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the prefix of consumer tags.
    ///
    /// Tags take the form `<prefix>.<generation>.<queue>`.
    pub fn consumer_tag_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.consumer_tag_prefix = prefix.into();
        self
    }

    /// Sets whether a nack requeues the message.
    ///
    /// With `false` the broker dead-letters or drops the message, depending on
    /// the queue's policy.
    pub fn requeue_on_nack(mut self, requeue: bool) -> Self {
        self.requeue_on_nack = requeue;
        self
    }

    /// Registers a listener for every event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a listener implementing [`EventListener`].
    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Registers a callback invoked whenever a connection is opened.
    ///
    /// # Callback Signature
    /// `Fn(u64)` - Called with the generation of the new channel.
    pub fn on_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ClientEvent::Connected { generation, .. } = event {
                f(*generation);
            }
        }));
        self
    }

    /// Registers a callback invoked before each recovery.
    ///
    /// # Callback Signature
    /// `Fn(&'static str, ErrorKind, usize)` - Called with the operation name,
    /// the failure kind and the 1-indexed recovery attempt.
    ///
    /// # Example
    /// ```rust
    /// use amqp_recovery::ClientConfig;
    ///
    /// let config = ClientConfig::builder()
    ///     .name("orders")
    ///     .on_recovering(|operation, kind, attempt| {
    ///         println!("{} failed ({}), recovery attempt {}", operation, kind, attempt);
    ///     })
    ///     .build();
    /// assert_eq!(config.name(), "orders");
    /// ```
    pub fn on_recovering<F>(mut self, f: F) -> Self
    where
        F: Fn(&'static str, ErrorKind, usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ClientEvent::Recovering {
                operation,
                kind,
                attempt,
                ..
            } = event
            {
                f(*operation, *kind, *attempt);
            }
        }));
        self
    }

    /// Registers a callback invoked when the broker rejects an operation.
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&'static str) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ClientEvent::Rejected { operation, .. } = event {
                f(*operation);
            }
        }));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ClientConfig {
        ClientConfig {
            name: self.name,
            consumer_tag_prefix: self.consumer_tag_prefix,
            requeue_on_nack: self.requeue_on_nack,
            event_listeners: self.event_listeners,
        }
    }
}
