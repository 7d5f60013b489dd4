//! The consume loop behind [`Client::pull`](crate::Client::pull).

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
#[cfg(feature = "metrics")]
use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::events::ClientEvent;
use crate::recovery::Operation;
use crate::state::ConnectionStatus;
use crate::transport::{BrokerChannel, Delivery};

/// What the consume loop does with a delivery once the handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge on the consuming channel.
    Ack,
    /// Reject on the consuming channel, requeueing per
    /// [`ClientConfig::requeue_on_nack`].
    Nack,
    /// Leave the delivery unsettled; the caller settles it later with
    /// [`Client::ack`](crate::Client::ack) or [`Client::nack`](crate::Client::nack).
    Defer,
}

/// Registers one consumer per queue and dispatches deliveries to a handler
/// until cancelled.
///
/// Re-running after a recovery declares the queues and registers consumers
/// again on the new channel.
pub(crate) struct Consume<H> {
    queues: Vec<String>,
    prefetch: u16,
    cancel: CancellationToken,
    handler: H,
    status: ConnectionStatus,
    config: Arc<ClientConfig>,
    deliveries: u64,
}

impl<H> Consume<H> {
    pub(crate) fn new(
        queues: Vec<String>,
        prefetch: u16,
        cancel: CancellationToken,
        handler: H,
        status: ConnectionStatus,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            queues,
            prefetch,
            cancel,
            handler,
            status,
            config,
            deliveries: 0,
        }
    }

    fn consumer_tag(&self, generation: u64, queue: &str) -> String {
        format!("{}.{}.{}", self.config.consumer_tag_prefix, generation, queue)
    }
}

impl<C, H, Fut> Operation<C> for Consume<H>
where
    C: BrokerChannel,
    H: FnMut(Delivery) -> Fut + Send,
    Fut: Future<Output = Disposition> + Send,
{
    type Output = ();

    fn name(&self) -> &'static str {
        "pull"
    }

    fn call<'a>(&'a mut self, channel: &'a C) -> BoxFuture<'a, Result<(), C::Error>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() || self.queues.is_empty() {
                return Ok(());
            }

            channel.set_prefetch(self.prefetch).await?;

            let generation = self.status.generation();
            let mut tags = Vec::with_capacity(self.queues.len());
            let mut streams = Vec::with_capacity(self.queues.len());
            for queue in &self.queues {
                channel.declare_durable_queue(queue).await?;
                let tag = self.consumer_tag(generation, queue);
                streams.push(channel.register_consumer(queue, &tag).await?);
                tags.push(tag);
            }

            #[cfg(feature = "tracing")]
            tracing::info!(
                client = %self.config.name,
                queues = ?self.queues,
                prefetch = self.prefetch,
                generation,
                "consuming"
            );
            self.config.emit(&ClientEvent::ConsumerStarted {
                client: self.config.name.clone(),
                timestamp: Instant::now(),
                queues: self.queues.clone(),
                prefetch: self.prefetch,
            });

            let mut deliveries = stream::select_all(streams);
            let cancelled = loop {
                tokio::select! {
                    biased;

                    _ = self.cancel.cancelled() => {
                        for tag in &tags {
                            channel.cancel_consumer(tag).await?;
                        }
                        break true;
                    }
                    next = deliveries.next() => match next {
                        Some(Ok(mut delivery)) => {
                            delivery.stamp_generation(generation);
                            let tag = delivery.handle().tag();
                            self.deliveries += 1;

                            #[cfg(feature = "tracing")]
                            tracing::trace!(
                                client = %self.config.name,
                                delivery_tag = tag,
                                routing_key = delivery.routing_key(),
                                redelivered = delivery.redelivered(),
                                "delivery received"
                            );
                            #[cfg(feature = "metrics")]
                            counter!("amqp_client_deliveries_total", "client" => self.config.name.clone())
                                .increment(1);

                            match (self.handler)(delivery).await {
                                Disposition::Ack => channel.ack(tag).await?,
                                Disposition::Nack => {
                                    channel.nack(tag, self.config.requeue_on_nack).await?
                                }
                                Disposition::Defer => {}
                            }
                        }
                        Some(Err(error)) => return Err(error),
                        // every consumer was cancelled by the broker
                        None => break false,
                    }
                }
            };

            #[cfg(feature = "tracing")]
            tracing::info!(
                client = %self.config.name,
                deliveries = self.deliveries,
                cancelled,
                "stopped consuming"
            );
            self.config.emit(&ClientEvent::ConsumerStopped {
                client: self.config.name.clone(),
                timestamp: Instant::now(),
                deliveries: self.deliveries,
                cancelled,
            });
            Ok(())
        })
    }
}
