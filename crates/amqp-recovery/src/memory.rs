//! In-memory broker for tests and examples.
//!
//! [`MemoryBroker`] implements the transport traits without a network. It keeps
//! a journal of every primitive call, lets tests inject a failure into the next
//! call of a given primitive, and models the broker behaviour the recovery
//! policy depends on:
//!
//! - a failed connection closes its channels, errors their consumer streams and
//!   requeues their unacknowledged deliveries as redelivered;
//! - a channel-level protocol error (unknown delivery tag, inequivalent queue
//!   declaration, missing exchange) closes the channel;
//! - closing a connection that already failed reports it as already closed.
//!
//! Delivery tags are scoped to the delivering channel and count up from 1 on
//! every channel, so a tag from a closed channel may name a different delivery
//! on its replacement.
//!
//! ```rust,ignore
//! use amqp_recovery::memory::{Fault, MemoryBroker, Op};
//! use amqp_recovery::Client;
//!
//! let broker = MemoryBroker::new();
//! let mut client = Client::new(broker.transport(), "amqp://localhost");
//!
//! broker.inject(Op::Publish, Fault::Transient);
//! client.push(b"hello", "q1", None).await.unwrap();
//!
//! assert_eq!(broker.published().len(), 1);
//! assert_eq!(broker.count(Op::OpenConnection), 2);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::StreamExt;
use thiserror::Error;

use crate::classifier::BrokerError;
use crate::transport::{BrokerChannel, BrokerConnection, Delivery, DeliveryStream, Endpoint, Transport};

/// Errors raised by the in-memory broker, mirroring the AMQP failure modes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The connection failed or is unreachable.
    #[error("connection lost: {0}")]
    Connection(String),

    /// The broker closed the connection, e.g. `ACCESS_REFUSED`.
    #[error("connection closed by broker: {code} {text}")]
    ConnectionClosedByBroker { code: u16, text: String },

    /// The broker closed the channel because of a protocol error.
    #[error("channel closed by broker: {code} {text}")]
    ChannelClosedByBroker { code: u16, text: String },

    /// The channel was used after being closed.
    #[error("channel is closed")]
    ChannelClosed,

    /// `close()` on a connection that is not open.
    #[error("connection is not open")]
    ConnectionWrongState,
}

impl BrokerError for MemoryError {
    fn is_channel_invalid(&self) -> bool {
        matches!(self, MemoryError::ChannelClosed)
    }

    fn is_broker_rejected(&self) -> bool {
        matches!(
            self,
            MemoryError::ConnectionClosedByBroker { .. } | MemoryError::ChannelClosedByBroker { .. }
        )
    }

    fn is_already_closed(&self) -> bool {
        matches!(self, MemoryError::ConnectionWrongState)
    }
}

/// Broker primitives, used to inject faults and read call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    OpenConnection,
    OpenChannel,
    CloseConnection,
    DeclareQueue,
    Publish,
    SetPrefetch,
    RegisterConsumer,
    CancelConsumer,
    Ack,
    Nack,
}

/// A failure to inject into the next call of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The call fails with a connection error and the connection breaks.
    Transient,
    /// The broker refuses the call and closes the channel (or the connection,
    /// for connection-level primitives).
    Rejected,
    /// The call fails because the channel is unusable; the channel is closed.
    ChannelInvalid,
}

/// A message as published, recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// A consumer registration, recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub queue: String,
    pub consumer_tag: String,
}

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct Queue {
    durable: bool,
    ready: VecDeque<Message>,
}

#[derive(Debug)]
struct Channel {
    connection: u64,
    open: bool,
    prefetch: u16,
    next_tag: u64,
}

struct Consumer {
    tag: String,
    queue: String,
    channel: u64,
    prefetch: u16,
    sender: mpsc::UnboundedSender<Result<Delivery, MemoryError>>,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    consumer: String,
    message: Message,
}

#[derive(Default)]
struct State {
    next_id: u64,
    refuse_connections: bool,
    connections: HashMap<u64, bool>,
    channels: HashMap<u64, Channel>,
    queues: HashMap<String, Queue>,
    exchanges: HashSet<String>,
    consumers: Vec<Consumer>,
    /// Keyed by channel id and delivery tag.
    unacked: HashMap<(u64, u64), Unacked>,
    faults: HashMap<Op, VecDeque<Fault>>,
    attempts: HashMap<Op, usize>,
    counts: HashMap<Op, usize>,
    declared: Vec<String>,
    published: Vec<Published>,
    prefetches: Vec<u16>,
    registrations: Vec<Registration>,
    cancellations: Vec<String>,
    acked: Vec<Vec<u8>>,
    nacked: Vec<(Vec<u8>, bool)>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Counts the attempt and applies a pending fault or channel check.
    fn begin(&mut self, op: Op, connection: Option<u64>, channel: Option<u64>) -> Result<(), MemoryError> {
        *self.attempts.entry(op).or_default() += 1;

        if let Some(fault) = self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(self.apply(fault, connection, channel));
        }

        if let Some(id) = channel {
            let Some(ch) = self.channels.get(&id) else {
                return Err(MemoryError::ChannelClosed);
            };
            if !self.connections.get(&ch.connection).copied().unwrap_or(false) {
                return Err(MemoryError::Connection("connection is closed".into()));
            }
            if !ch.open {
                return Err(MemoryError::ChannelClosed);
            }
        }
        Ok(())
    }

    fn finish(&mut self, op: Op) {
        *self.counts.entry(op).or_default() += 1;
    }

    fn apply(&mut self, fault: Fault, connection: Option<u64>, channel: Option<u64>) -> MemoryError {
        let connection = connection.or_else(|| {
            channel.and_then(|id| self.channels.get(&id).map(|ch| ch.connection))
        });
        match fault {
            Fault::Transient => {
                let error = MemoryError::Connection("injected failure".into());
                if let Some(id) = connection {
                    self.shutdown_connection(id, Some(error.clone()));
                }
                error
            }
            Fault::Rejected => match (connection, channel) {
                (_, Some(id)) => self.reject(id, 406, "PRECONDITION_FAILED - injected"),
                (Some(id), None) => {
                    let error = MemoryError::ConnectionClosedByBroker {
                        code: 320,
                        text: "CONNECTION_FORCED - injected".into(),
                    };
                    self.shutdown_connection(id, Some(error.clone()));
                    error
                }
                (None, None) => MemoryError::ConnectionClosedByBroker {
                    code: 403,
                    text: "ACCESS_REFUSED - injected".into(),
                },
            },
            Fault::ChannelInvalid => {
                if let Some(id) = channel {
                    self.close_channel(id, Some(MemoryError::ChannelClosed));
                }
                MemoryError::ChannelClosed
            }
        }
    }

    /// Closes `channel` with a protocol error and returns the error.
    fn reject(&mut self, channel: u64, code: u16, text: impl Into<String>) -> MemoryError {
        let error = MemoryError::ChannelClosedByBroker {
            code,
            text: text.into(),
        };
        self.close_channel(channel, Some(error.clone()));
        error
    }

    fn shutdown_connection(&mut self, connection: u64, cause: Option<MemoryError>) {
        if let Some(open) = self.connections.get_mut(&connection) {
            *open = false;
        }
        let mut channels: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, ch)| ch.connection == connection && ch.open)
            .map(|(id, _)| *id)
            .collect();
        channels.sort_unstable();
        for id in channels {
            self.close_channel(id, cause.clone());
        }
    }

    /// Closes a channel: its consumers go away and its unacked deliveries are requeued.
    fn close_channel(&mut self, channel: u64, cause: Option<MemoryError>) {
        if let Some(ch) = self.channels.get_mut(&channel) {
            ch.open = false;
        }

        let (closed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.consumers)
            .into_iter()
            .partition(|c| c.channel == channel);
        self.consumers = kept;
        if let Some(error) = cause {
            for consumer in &closed {
                let _ = consumer.sender.unbounded_send(Err(error.clone()));
            }
        }
        drop(closed);

        let mut keys: Vec<(u64, u64)> = self
            .unacked
            .keys()
            .filter(|(ch, _)| *ch == channel)
            .copied()
            .collect();
        keys.sort_unstable_by(|a, b| b.cmp(a));
        for key in keys {
            if let Some(unacked) = self.unacked.remove(&key) {
                let mut message = unacked.message;
                message.redelivered = true;
                if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                    queue.ready.push_front(message);
                }
            }
        }
        self.dispatch();
    }

    /// Removes the delivery `tag` of `channel` from the unacked set.
    fn settle(&mut self, channel: u64, tag: u64) -> Option<(String, Message)> {
        self.unacked
            .remove(&(channel, tag))
            .map(|unacked| (unacked.queue, unacked.message))
    }

    fn has_capacity(&self, consumer: &Consumer) -> bool {
        consumer.prefetch == 0
            || self
                .unacked
                .values()
                .filter(|u| u.consumer == consumer.tag)
                .count()
                < usize::from(consumer.prefetch)
    }

    /// Hands ready messages to consumers with spare prefetch capacity.
    fn dispatch(&mut self) {
        loop {
            let mut progressed = false;
            for idx in 0..self.consumers.len() {
                if !self.has_capacity(&self.consumers[idx]) {
                    continue;
                }
                let queue_name = self.consumers[idx].queue.clone();
                let Some(mut message) = self
                    .queues
                    .get_mut(&queue_name)
                    .and_then(|q| q.ready.pop_front())
                else {
                    continue;
                };

                let channel = self.consumers[idx].channel;
                let Some(tag) = self.channels.get_mut(&channel).map(|ch| {
                    ch.next_tag += 1;
                    ch.next_tag
                }) else {
                    if let Some(queue) = self.queues.get_mut(&queue_name) {
                        queue.ready.push_front(message);
                    }
                    continue;
                };
                let delivery = Delivery::new(tag, message.body.clone())
                    .with_exchange(message.exchange.clone())
                    .with_routing_key(message.routing_key.clone())
                    .with_redelivered(message.redelivered);

                let consumer = &self.consumers[idx];
                if consumer.sender.unbounded_send(Ok(delivery)).is_err() {
                    if let Some(queue) = self.queues.get_mut(&queue_name) {
                        queue.ready.push_front(message);
                    }
                    continue;
                }
                let consumer_tag = consumer.tag.clone();
                self.unacked.insert(
                    (channel, tag),
                    Unacked {
                        queue: queue_name,
                        consumer: consumer_tag,
                        message,
                    },
                );
                progressed = true;
            }
            self.consumers.retain(|c| !c.sender.is_closed());
            if !progressed {
                break;
            }
        }
    }

    fn enqueue(&mut self, queue: &str, message: Message) {
        if let Some(queue) = self.queues.get_mut(queue) {
            queue.ready.push_back(message);
        }
        self.dispatch();
    }
}

/// Handle to an in-memory broker. Clones share the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that opens connections to this broker.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next call of `op` fail with `fault`. Faults queue up per primitive.
    pub fn inject(&self, op: Op, fault: Fault) {
        self.state().faults.entry(op).or_default().push_back(fault);
    }

    /// While set, every connection attempt fails with a connection error.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Breaks every open connection, as a network partition would.
    pub fn kill_connections(&self) {
        let mut state = self.state();
        let mut open: Vec<u64> = state
            .connections
            .iter()
            .filter(|(_, open)| **open)
            .map(|(id, _)| *id)
            .collect();
        open.sort_unstable();
        for id in open {
            state.shutdown_connection(id, Some(MemoryError::Connection("connection reset by peer".into())));
        }
    }

    /// Cancels every consumer of `queue` from the broker side; their streams end.
    pub fn cancel_consumers(&self, queue: &str) {
        self.state().consumers.retain(|c| c.queue != queue);
    }

    /// Declares a direct exchange that routes by queue name.
    pub fn declare_exchange(&self, name: &str) {
        self.state().exchanges.insert(name.to_string());
    }

    /// Declares a non-durable queue, as another application might.
    pub fn declare_transient_queue(&self, name: &str) {
        self.state().queues.entry(name.to_string()).or_insert(Queue {
            durable: false,
            ready: VecDeque::new(),
        });
    }

    /// Publishes `body` to `queue` on behalf of another producer, declaring it if needed.
    pub fn enqueue(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.state();
        state.queues.entry(queue.to_string()).or_insert(Queue {
            durable: true,
            ready: VecDeque::new(),
        });
        state.enqueue(
            queue,
            Message {
                exchange: String::new(),
                routing_key: queue.to_string(),
                body: body.into(),
                redelivered: false,
            },
        );
    }

    /// Successful calls of `op`.
    pub fn count(&self, op: Op) -> usize {
        self.state().counts.get(&op).copied().unwrap_or(0)
    }

    /// Calls of `op`, failed ones included.
    pub fn attempts(&self, op: Op) -> usize {
        self.state().attempts.get(&op).copied().unwrap_or(0)
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> usize {
        self.state().connections.values().filter(|open| **open).count()
    }

    /// Queue names passed to successful declarations, in call order.
    pub fn declared_queues(&self) -> Vec<String> {
        self.state().declared.clone()
    }

    /// Whether `queue` exists and is durable.
    pub fn is_durable(&self, queue: &str) -> bool {
        self.state().queues.get(queue).is_some_and(|q| q.durable)
    }

    /// Messages waiting in `queue`.
    pub fn ready(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Deliveries handed out and not yet settled.
    pub fn unacked(&self) -> usize {
        self.state().unacked.len()
    }

    /// Every successful publish, in call order.
    pub fn published(&self) -> Vec<Published> {
        self.state().published.clone()
    }

    /// Prefetch values passed to successful `set_prefetch` calls.
    pub fn prefetches(&self) -> Vec<u16> {
        self.state().prefetches.clone()
    }

    /// Every successful consumer registration, in call order.
    pub fn registrations(&self) -> Vec<Registration> {
        self.state().registrations.clone()
    }

    /// Consumer tags cancelled by the client.
    pub fn cancellations(&self) -> Vec<String> {
        self.state().cancellations.clone()
    }

    /// Consumers currently registered.
    pub fn active_consumers(&self) -> usize {
        self.state().consumers.len()
    }

    /// Bodies of acknowledged messages, in settlement order.
    pub fn acked(&self) -> Vec<Vec<u8>> {
        self.state().acked.clone()
    }

    /// Bodies of rejected messages with their requeue flag.
    pub fn nacked(&self) -> Vec<(Vec<u8>, bool)> {
        self.state().nacked.clone()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryBroker")
            .field("connections", &state.connections.values().filter(|o| **o).count())
            .field("queues", &state.queues.len())
            .field("consumers", &state.consumers.len())
            .field("unacked", &state.unacked.len())
            .finish()
    }
}

/// [`Transport`] connecting to a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    fn open_connection<'a>(
        &'a self,
        _endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<MemoryConnection, MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::OpenConnection, None, None)?;
            if state.refuse_connections {
                return Err(MemoryError::Connection("connection refused".into()));
            }
            let id = state.next_id();
            state.connections.insert(id, true);
            state.finish(Op::OpenConnection);
            Ok(MemoryConnection {
                id,
                broker: self.broker.clone(),
            })
        })
    }
}

/// A connection to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
}

impl BrokerConnection for MemoryConnection {
    type Channel = MemoryChannel;
    type Error = MemoryError;

    fn open_channel(&self) -> BoxFuture<'_, Result<MemoryChannel, MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::OpenChannel, Some(self.id), None)?;
            if !state.connections.get(&self.id).copied().unwrap_or(false) {
                return Err(MemoryError::Connection("connection is closed".into()));
            }
            let id = state.next_id();
            state.channels.insert(
                id,
                Channel {
                    connection: self.id,
                    open: true,
                    prefetch: 0,
                    next_tag: 0,
                },
            );
            state.finish(Op::OpenChannel);
            Ok(MemoryChannel {
                id,
                broker: self.broker.clone(),
            })
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::CloseConnection, Some(self.id), None)?;
            if !state.connections.get(&self.id).copied().unwrap_or(false) {
                return Err(MemoryError::ConnectionWrongState);
            }
            state.shutdown_connection(self.id, None);
            state.finish(Op::CloseConnection);
            Ok(())
        })
    }

    fn is_open(&self) -> bool {
        self.broker
            .state()
            .connections
            .get(&self.id)
            .copied()
            .unwrap_or(false)
    }
}

/// A channel on a [`MemoryConnection`].
#[derive(Debug)]
pub struct MemoryChannel {
    id: u64,
    broker: MemoryBroker,
}

impl BrokerChannel for MemoryChannel {
    type Error = MemoryError;

    fn declare_durable_queue<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::DeclareQueue, None, Some(self.id))?;
            match state.queues.get(queue).map(|q| q.durable) {
                Some(false) => {
                    return Err(state.reject(
                        self.id,
                        406,
                        format!("PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{queue}'"),
                    ));
                }
                Some(true) => {}
                None => {
                    state.queues.insert(
                        queue.to_string(),
                        Queue {
                            durable: true,
                            ready: VecDeque::new(),
                        },
                    );
                }
            }
            state.declared.push(queue.to_string());
            state.finish(Op::DeclareQueue);
            Ok(())
        })
    }

    fn publish<'a>(
        &'a self,
        exchange: &'a str,
        routing_key: &'a str,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::Publish, None, Some(self.id))?;
            if !exchange.is_empty() && !state.exchanges.contains(exchange) {
                return Err(state.reject(
                    self.id,
                    404,
                    format!("NOT_FOUND - no exchange '{exchange}'"),
                ));
            }
            state.published.push(Published {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                body: body.to_vec(),
            });
            state.enqueue(
                routing_key,
                Message {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body: body.to_vec(),
                    redelivered: false,
                },
            );
            state.finish(Op::Publish);
            Ok(())
        })
    }

    fn set_prefetch(&self, count: u16) -> BoxFuture<'_, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::SetPrefetch, None, Some(self.id))?;
            if let Some(channel) = state.channels.get_mut(&self.id) {
                channel.prefetch = count;
            }
            state.prefetches.push(count);
            state.finish(Op::SetPrefetch);
            Ok(())
        })
    }

    fn register_consumer<'a>(
        &'a self,
        queue: &'a str,
        consumer_tag: &'a str,
    ) -> BoxFuture<'a, Result<DeliveryStream<MemoryError>, MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::RegisterConsumer, None, Some(self.id))?;
            if !state.queues.contains_key(queue) {
                return Err(state.reject(self.id, 404, format!("NOT_FOUND - no queue '{queue}'")));
            }
            if state.consumers.iter().any(|c| c.tag == consumer_tag) {
                return Err(state.reject(
                    self.id,
                    530,
                    format!("NOT_ALLOWED - attempt to reuse consumer tag '{consumer_tag}'"),
                ));
            }
            let prefetch = state.channels.get(&self.id).map_or(0, |ch| ch.prefetch);
            let (sender, receiver) = mpsc::unbounded();
            state.consumers.push(Consumer {
                tag: consumer_tag.to_string(),
                queue: queue.to_string(),
                channel: self.id,
                prefetch,
                sender,
            });
            state.registrations.push(Registration {
                queue: queue.to_string(),
                consumer_tag: consumer_tag.to_string(),
            });
            state.finish(Op::RegisterConsumer);
            state.dispatch();
            Ok(receiver.boxed())
        })
    }

    fn cancel_consumer<'a>(&'a self, consumer_tag: &'a str) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::CancelConsumer, None, Some(self.id))?;
            state
                .consumers
                .retain(|c| !(c.channel == self.id && c.tag == consumer_tag));
            state.cancellations.push(consumer_tag.to_string());
            state.finish(Op::CancelConsumer);
            Ok(())
        })
    }

    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::Ack, None, Some(self.id))?;
            let Some((_, message)) = state.settle(self.id, delivery_tag) else {
                return Err(state.reject(
                    self.id,
                    406,
                    format!("PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"),
                ));
            };
            state.acked.push(message.body);
            state.finish(Op::Ack);
            state.dispatch();
            Ok(())
        })
    }

    fn nack(&self, delivery_tag: u64, requeue: bool) -> BoxFuture<'_, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut state = self.broker.state();
            state.begin(Op::Nack, None, Some(self.id))?;
            let Some((queue, mut message)) = state.settle(self.id, delivery_tag) else {
                return Err(state.reject(
                    self.id,
                    406,
                    format!("PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"),
                ));
            };
            state.nacked.push((message.body.clone(), requeue));
            if requeue {
                message.redelivered = true;
                if let Some(queue) = state.queues.get_mut(&queue) {
                    queue.ready.push_front(message);
                }
            }
            state.finish(Op::Nack);
            state.dispatch();
            Ok(())
        })
    }
}
