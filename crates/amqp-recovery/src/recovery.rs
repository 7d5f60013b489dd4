//! The recovery policy applied to every broker-facing operation.
//!
//! [`run`] ensures a live connection, invokes the operation on the current
//! channel and, on failure, consults [`classify`] to either rebuild and retry
//! or hand the error back. Retries are unbounded and undelayed; the loop only
//! yields to the runtime between attempts.

use std::marker::PhantomData;
use std::time::Instant;

use futures::future::BoxFuture;
#[cfg(feature = "metrics")]
use metrics::counter;

use crate::classifier::{classify, ErrorKind};
use crate::connection::{ConnectError, ConnectionManager};
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::transport::{BrokerChannel, ChannelOf, ErrorOf, Transport};

/// A broker operation that can be re-run on a fresh channel.
///
/// `call` may be invoked any number of times; each invocation receives the
/// channel that is current at that moment and must not keep it.
pub trait Operation<C: BrokerChannel>: Send {
    /// Value produced on success.
    type Output: Send;

    /// Name used in errors, events, logs and metric labels.
    fn name(&self) -> &'static str;

    /// Runs the operation once on `channel`.
    fn call<'a>(&'a mut self, channel: &'a C) -> BoxFuture<'a, Result<Self::Output, C::Error>>;
}

/// An [`Operation`] backed by a closure.
pub struct FnOperation<F, R> {
    name: &'static str,
    f: F,
    _output: PhantomData<fn() -> R>,
}

impl<F, R> FnOperation<F, R> {
    /// Wraps `f` as an operation called `name`.
    pub fn new<C>(name: &'static str, f: F) -> Self
    where
        C: BrokerChannel,
        F: for<'a> FnMut(&'a C) -> BoxFuture<'a, Result<R, C::Error>> + Send,
    {
        Self {
            name,
            f,
            _output: PhantomData,
        }
    }
}

impl<C, F, R> Operation<C> for FnOperation<F, R>
where
    C: BrokerChannel,
    F: for<'a> FnMut(&'a C) -> BoxFuture<'a, Result<R, C::Error>> + Send,
    R: Send,
{
    type Output = R;

    fn name(&self) -> &'static str {
        self.name
    }

    fn call<'a>(&'a mut self, channel: &'a C) -> BoxFuture<'a, Result<R, C::Error>> {
        (self.f)(channel)
    }
}

/// Runs `op` until it succeeds or the broker rejects it.
///
/// Channel-invalid failures rebuild the connection and channel before
/// retrying. Transient failures close the broken connection best-effort and
/// reconnect. A rejection is returned on first occurrence without
/// reconnecting. A failure to close, other than the connection already being
/// closed, is returned as [`ClientError::Close`].
pub(crate) async fn run<T, O>(
    manager: &mut ConnectionManager<T>,
    op: &mut O,
) -> Result<O::Output, ClientError<ErrorOf<T>>>
where
    T: Transport,
    O: Operation<ChannelOf<T>>,
{
    let operation = op.name();
    let mut attempts = 0usize;
    let mut recoveries = 0usize;

    loop {
        if !manager.is_connected() {
            match manager.connect().await {
                Ok(()) => {}
                Err(ConnectError::Close(error)) => return Err(ClientError::Close(error)),
                Err(ConnectError::Open(error)) => {
                    let kind = classify(&error);
                    if kind == ErrorKind::BrokerRejected {
                        reject(manager, operation);
                        return Err(ClientError::Rejected {
                            operation,
                            source: error,
                        });
                    }
                    recoveries += 1;
                    recovering(manager, operation, kind, recoveries, &error);
                    tokio::task::yield_now().await;
                    continue;
                }
            }
        }

        let Some(channel) = manager.channel() else {
            continue;
        };
        attempts += 1;
        let error = match op.call(channel).await {
            Ok(output) => {
                succeed(manager, operation, attempts);
                return Ok(output);
            }
            Err(error) => error,
        };

        let kind = classify(&error);
        match kind {
            ErrorKind::BrokerRejected => {
                reject(manager, operation);
                return Err(ClientError::Rejected {
                    operation,
                    source: error,
                });
            }
            // reopened by the connect at the top of the loop
            ErrorKind::ChannelInvalid | ErrorKind::TransientConnectionFailure => {
                recoveries += 1;
                recovering(manager, operation, kind, recoveries, &error);
                manager
                    .close_best_effort()
                    .await
                    .map_err(ClientError::Close)?;
            }
        }
        tokio::task::yield_now().await;
    }
}

fn recovering<T: Transport>(
    manager: &ConnectionManager<T>,
    operation: &'static str,
    kind: ErrorKind,
    attempt: usize,
    error: &ErrorOf<T>,
) {
    let config = manager.config();

    #[cfg(feature = "tracing")]
    tracing::warn!(
        client = %config.name,
        operation,
        kind = kind.as_str(),
        attempt,
        %error,
        "connection error, recovering"
    );
    #[cfg(not(feature = "tracing"))]
    let _ = error;

    #[cfg(feature = "metrics")]
    counter!(
        "amqp_client_recoveries_total",
        "client" => config.name.clone(),
        "operation" => operation,
        "kind" => kind.as_str()
    )
    .increment(1);

    config.emit(&ClientEvent::Recovering {
        client: config.name.clone(),
        timestamp: Instant::now(),
        operation,
        kind,
        attempt,
    });
}

fn reject<T: Transport>(manager: &ConnectionManager<T>, operation: &'static str) {
    let config = manager.config();

    #[cfg(feature = "tracing")]
    tracing::error!(client = %config.name, operation, "broker rejected operation");

    #[cfg(feature = "metrics")]
    counter!(
        "amqp_client_operations_total",
        "client" => config.name.clone(),
        "operation" => operation,
        "outcome" => "rejected"
    )
    .increment(1);

    config.emit(&ClientEvent::Rejected {
        client: config.name.clone(),
        timestamp: Instant::now(),
        operation,
    });
}

fn succeed<T: Transport>(manager: &ConnectionManager<T>, operation: &'static str, attempts: usize) {
    let config = manager.config();

    #[cfg(feature = "tracing")]
    tracing::debug!(client = %config.name, operation, attempts, "operation succeeded");

    #[cfg(feature = "metrics")]
    counter!(
        "amqp_client_operations_total",
        "client" => config.name.clone(),
        "operation" => operation,
        "outcome" => "success"
    )
    .increment(1);

    config.emit(&ClientEvent::Succeeded {
        client: config.name.clone(),
        timestamp: Instant::now(),
        operation,
        attempts,
    });
}
