//! Lifecycle of the single connection and channel a client owns.

use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::classifier::BrokerError;
use crate::config::ClientConfig;
use crate::events::ClientEvent;
use crate::state::{ConnectionState, ConnectionStatus};
use crate::transport::{BrokerConnection, ChannelOf, Endpoint, ErrorOf, Transport};

/// Owns at most one live connection and the channel derived from it.
///
/// The channel is only ever handed out while its connection is held, and both
/// are replaced together.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    endpoint: Endpoint,
    link: Option<Link<T>>,
    status: ConnectionStatus,
    config: Arc<ClientConfig>,
}

struct Link<T: Transport> {
    connection: T::Connection,
    channel: ChannelOf<T>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a manager in the `Disconnected` state. Nothing is opened yet.
    pub fn new(transport: T, endpoint: Endpoint, config: Arc<ClientConfig>) -> Self {
        Self {
            transport,
            endpoint,
            link: None,
            status: ConnectionStatus::new(),
            config,
        }
    }

    /// Opens a fresh connection and channel, superseding any current pair.
    ///
    /// The previous connection is closed best-effort first, so at most one
    /// connection is live afterwards. A single open attempt is made.
    pub async fn connect(&mut self) -> Result<(), ConnectError<ErrorOf<T>>> {
        self.close_best_effort().await.map_err(ConnectError::Close)?;
        self.open().await.map_err(ConnectError::Open)
    }

    /// Returns whether a connection is held, reports itself open, and has a channel.
    ///
    /// This is a precondition check, not a guarantee: the connection may fail
    /// right after it returns `true`. A held connection found closed marks the
    /// status `Disconnected`.
    pub fn is_connected(&self) -> bool {
        let Some(link) = &self.link else {
            return false;
        };
        if link.connection.is_open() {
            return true;
        }
        if self.status.state() == ConnectionState::Connected {
            self.status.mark_disconnected();
            #[cfg(feature = "metrics")]
            gauge!("amqp_client_connected", "client" => self.config.name.clone()).set(0.0);
            #[cfg(feature = "tracing")]
            tracing::info!(client = %self.config.name, "connection lost");
        }
        false
    }

    /// Closes the current connection, if any.
    ///
    /// An error reporting the connection as already closed is swallowed. The
    /// manager is `Disconnected` afterwards, whatever the outcome.
    pub async fn close_best_effort(&mut self) -> Result<(), ErrorOf<T>> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        self.status.mark_disconnected();
        #[cfg(feature = "metrics")]
        gauge!("amqp_client_connected", "client" => self.config.name.clone()).set(0.0);

        let result = link.connection.close().await;
        drop(link);

        let already_closed = match result {
            Ok(()) => false,
            Err(error) if error.is_already_closed() => true,
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::error!(client = %self.config.name, %error, "failed to close connection");
                self.config.emit(&ClientEvent::Disconnected {
                    client: self.config.name.clone(),
                    timestamp: Instant::now(),
                    already_closed: false,
                });
                return Err(error);
            }
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            client = %self.config.name,
            already_closed,
            "connection closed"
        );

        self.config.emit(&ClientEvent::Disconnected {
            client: self.config.name.clone(),
            timestamp: Instant::now(),
            already_closed,
        });
        Ok(())
    }

    /// The current channel, if connected.
    pub fn channel(&self) -> Option<&ChannelOf<T>> {
        self.link.as_ref().map(|link| &link.channel)
    }

    /// Current connection state, checking a held connection first.
    pub fn state(&self) -> ConnectionState {
        self.is_connected();
        self.status.state()
    }

    /// Shared view of the connection state.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// The endpoint connections are opened against.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Opens a connection and channel without closing anything first.
    ///
    /// Callers must have released the previous pair.
    pub(crate) async fn open(&mut self) -> Result<(), ErrorOf<T>> {
        debug_assert!(self.link.is_none());

        let connection = self.transport.open_connection(&self.endpoint).await?;
        let channel = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(error) => {
                // best-effort; the open error is the one worth reporting
                let _ = connection.close().await;
                return Err(error);
            }
        };

        self.link = Some(Link {
            connection,
            channel,
        });
        let generation = self.status.mark_connected();

        #[cfg(feature = "tracing")]
        tracing::info!(
            client = %self.config.name,
            endpoint = %self.endpoint,
            generation,
            "connected to broker"
        );

        #[cfg(feature = "metrics")]
        {
            counter!("amqp_client_connections_total", "client" => self.config.name.clone())
                .increment(1);
            gauge!("amqp_client_connected", "client" => self.config.name.clone()).set(1.0);
        }

        self.config.emit(&ClientEvent::Connected {
            client: self.config.name.clone(),
            timestamp: Instant::now(),
            generation,
        });
        Ok(())
    }
}

impl<T: Transport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("status", &self.status)
            .finish()
    }
}

/// Why [`ConnectionManager::connect`] failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError<E> {
    /// Closing the superseded connection failed.
    #[error("failed to close superseded connection: {0}")]
    Close(#[source] E),

    /// Opening the new connection or channel failed.
    #[error("failed to open connection: {0}")]
    Open(#[source] E),
}
