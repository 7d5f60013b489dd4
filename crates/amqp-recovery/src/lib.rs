//! A message-broker client that survives connection failures.
//!
//! [`Client`] exposes publish ([`push`](Client::push)), consume
//! ([`pull`](Client::pull)) and settlement ([`ack`](Client::ack),
//! [`nack`](Client::nack)) over a single connection and channel. Every
//! operation runs under the same recovery policy:
//!
//! 1. If no live connection exists, connect.
//! 2. Run the operation on the current channel.
//! 3. On failure, [`classify`] the error:
//!    - [`ErrorKind::ChannelInvalid`]: rebuild connection and channel, retry.
//!    - [`ErrorKind::BrokerRejected`]: return [`ClientError::Rejected`], no reconnect.
//!    - [`ErrorKind::TransientConnectionFailure`]: close the broken connection
//!      best-effort, reconnect, retry.
//!
//! Retries are unbounded and undelayed. Only rejections reach the caller; the
//! client stays usable afterwards.
//!
//! Delivery tags are scoped to the channel that delivered them. Acking or
//! nacking a delivery whose channel has since been replaced returns
//! [`ClientError::StaleHandle`] without contacting the broker, which has
//! already requeued the message.
//!
//! The wire protocol lives behind the [`Transport`], [`BrokerConnection`] and
//! [`BrokerChannel`] traits. `amqp-recovery-lapin` implements them for
//! RabbitMQ; the `memory` module (feature `test-util`) provides an in-memory
//! broker with fault injection.
//!
//! # Example
//!
//! ```rust,ignore
//! use amqp_recovery::{Client, Disposition};
//! use amqp_recovery_lapin::LapinTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! let mut publisher = Client::new(LapinTransport::default(), "amqp://localhost:5672/%2f");
//! publisher.push(b"hello", "q1", None).await?;
//!
//! let mut consumer = Client::new(LapinTransport::default(), "amqp://localhost:5672/%2f");
//! let cancel = CancellationToken::new();
//! consumer
//!     .pull(["q1"], 5, cancel.clone(), |delivery| async move {
//!         println!("{:?}", delivery.body());
//!         Disposition::Ack
//!     })
//!     .await?;
//! ```
//!
//! # Observability
//!
//! - Events: register listeners with [`ClientConfigBuilder::on_event`] and the
//!   typed callbacks (`on_connected`, `on_recovering`, `on_rejected`).
//! - Logging (feature `tracing`, on by default): connects and closes at `info`,
//!   recoveries at `warn`, rejections at `error`, successes at `debug`.
//! - Metrics (feature `metrics`):
//!   - `amqp_client_operations_total{client, operation, outcome}`
//!   - `amqp_client_recoveries_total{client, operation, kind}`
//!   - `amqp_client_connections_total{client}`
//!   - `amqp_client_connected{client}`
//!   - `amqp_client_deliveries_total{client}`

pub use classifier::{classify, BrokerError, ErrorKind};
pub use client::{Client, ClientResult};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use connection::{ConnectError, ConnectionManager};
pub use consume::Disposition;
pub use error::ClientError;
pub use events::{ClientEvent, EventListener, EventListeners, FnListener};
pub use recovery::{FnOperation, Operation};
pub use service::{Publish, Settle, SharedClient};
pub use state::{ConnectionState, ConnectionStatus};
pub use transport::{
    BrokerChannel, BrokerConnection, ChannelOf, Delivery, DeliveryHandle, DeliveryStream,
    Endpoint, ErrorOf, Transport,
};

pub mod classifier;
mod client;
mod config;
mod connection;
mod consume;
mod error;
mod events;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
mod recovery;
mod service;
mod state;
mod transport;
