//! A client shared behind a mutex, usable as a tower [`Service`].

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::sync::{Mutex, MutexGuard};
use tower::Service;

use crate::client::Client;
use crate::error::ClientError;
use crate::state::ConnectionStatus;
use crate::transport::{DeliveryHandle, ErrorOf, Transport};

/// A [`Client`] shared between tasks.
///
/// Operations are serialized: each request holds the lock for its whole
/// recovery loop. Implements `Service<Publish>` and `Service<Settle>` so
/// publishing and settlement compose with tower middleware.
///
/// A consumer should keep its own client; `pull` holds the lock until
/// cancelled.
pub struct SharedClient<T: Transport> {
    inner: Arc<Mutex<Client<T>>>,
    status: ConnectionStatus,
}

impl<T: Transport> SharedClient<T> {
    /// Wraps `client` for sharing.
    pub fn new(client: Client<T>) -> Self {
        let status = client.status();
        Self {
            inner: Arc::new(Mutex::new(client)),
            status,
        }
    }

    /// Waits for exclusive access to the client.
    pub async fn lock(&self) -> MutexGuard<'_, Client<T>> {
        self.inner.lock().await
    }

    /// Connection state, readable without taking the lock.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }
}

impl<T: Transport> Clone for SharedClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            status: self.status.clone(),
        }
    }
}

impl<T: Transport> From<Client<T>> for SharedClient<T> {
    fn from(client: Client<T>) -> Self {
        Self::new(client)
    }
}

/// Request to publish a message, see [`Client::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub queue: String,
    pub body: Vec<u8>,
    pub exchange: Option<String>,
}

impl Publish {
    /// Publishes `body` to `queue` through the default exchange.
    pub fn new(queue: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            queue: queue.into(),
            body: body.into(),
            exchange: None,
        }
    }

    /// Publishes through `exchange` instead.
    pub fn via(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }
}

/// Request to settle a delivery, see [`Client::ack`] and [`Client::nack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settle {
    Ack(DeliveryHandle),
    Nack(DeliveryHandle),
}

impl<T> Service<Publish> for SharedClient<T>
where
    T: Transport + 'static,
{
    type Response = ();
    type Error = ClientError<ErrorOf<T>>;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Publish) -> Self::Future {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut client = inner.lock().await;
            client
                .push(&req.body, &req.queue, req.exchange.as_deref())
                .await
        })
    }
}

impl<T> Service<Settle> for SharedClient<T>
where
    T: Transport + 'static,
{
    type Response = ();
    type Error = ClientError<ErrorOf<T>>;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Settle) -> Self::Future {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut client = inner.lock().await;
            match req {
                Settle::Ack(handle) => client.ack(&handle).await,
                Settle::Nack(handle) => client.nack(&handle).await,
            }
        })
    }
}
