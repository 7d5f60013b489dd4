use std::sync::{Arc, Mutex};

use amqp_recovery::memory::{Fault, MemoryBroker, Op, Published};
use amqp_recovery::{ConnectionState, DeliveryHandle, Disposition};
use tokio_util::sync::CancellationToken;

use super::{client, wait_until};

#[tokio::test]
async fn publish_declares_queue_then_publishes_once() {
    let broker = MemoryBroker::new();
    let mut client = client(&broker);

    client.push(b"hello", "q1", None).await.unwrap();

    assert_eq!(broker.declared_queues(), vec!["q1"]);
    assert!(broker.is_durable("q1"));
    assert_eq!(
        broker.published(),
        vec![Published {
            exchange: String::new(),
            routing_key: "q1".to_string(),
            body: b"hello".to_vec(),
        }]
    );
    assert_eq!(broker.count(Op::Publish), 1);
}

#[tokio::test]
async fn publish_through_named_exchange_routes_by_queue_name() {
    let broker = MemoryBroker::new();
    broker.declare_exchange("events");
    let mut client = client(&broker);

    client.push(b"created", "audit", Some("events")).await.unwrap();

    let published = broker.published();
    assert_eq!(published[0].exchange, "events");
    assert_eq!(published[0].routing_key, "audit");
    assert_eq!(broker.ready("audit"), 1);
}

#[tokio::test]
async fn consume_sets_prefetch_once_and_registers_per_queue() {
    let broker = MemoryBroker::new();
    let mut client = client(&broker);
    let cancel = CancellationToken::new();

    let pulling = {
        let cancel = cancel.clone();
        async move {
            let result = client
                .pull(["q1", "q2"], 5, cancel, |_| async { Disposition::Ack })
                .await;
            (client, result)
        }
    };
    let task = tokio::spawn(pulling);

    wait_until(|| broker.active_consumers() == 2).await;
    assert!(!task.is_finished());
    cancel.cancel();
    let (client, result) = task.await.unwrap();

    result.unwrap();
    assert_eq!(broker.prefetches(), vec![5]);
    let queues: Vec<_> = broker
        .registrations()
        .into_iter()
        .map(|registration| registration.queue)
        .collect();
    assert_eq!(queues, vec!["q1", "q2"]);
    assert_eq!(broker.cancellations().len(), 2);
    assert_eq!(broker.active_consumers(), 0);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn consume_delivers_each_message_to_the_handler() {
    let broker = MemoryBroker::new();
    broker.enqueue("q1", b"one".to_vec());
    broker.enqueue("q2", b"two".to_vec());
    let mut client = client(&broker);

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client
        .pull(["q1", "q2"], 1, cancel, move |delivery| {
            let sink = Arc::clone(&sink);
            let token = token.clone();
            async move {
                let mut seen = sink.lock().unwrap();
                seen.push((delivery.routing_key().to_string(), delivery.body().to_vec()));
                if seen.len() == 2 {
                    token.cancel();
                }
                Disposition::Ack
            }
        })
        .await
        .unwrap();

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("q1".to_string(), b"one".to_vec()),
            ("q2".to_string(), b"two".to_vec())
        ]
    );
    assert_eq!(broker.acked().len(), 2);
    assert_eq!(broker.unacked(), 0);
}

#[tokio::test]
async fn double_ack_does_not_break_later_operations() {
    let broker = MemoryBroker::new();
    broker.enqueue("jobs", b"job".to_vec());
    let mut client = client(&broker);

    let handle = deferred_handle(&mut client, "jobs").await;

    client.ack(&handle).await.unwrap();
    let second = client.ack(&handle).await;
    assert!(second.unwrap_err().is_rejected());

    // the client stays usable
    client.push(b"next", "jobs", None).await.unwrap();
    assert_eq!(broker.published().len(), 1);
    assert_eq!(broker.acked(), vec![b"job".to_vec()]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn deferred_ack_after_connection_loss_is_redelivered_instead() {
    let broker = MemoryBroker::new();
    broker.enqueue("jobs", b"job".to_vec());
    let mut client = client(&broker);
    let handle = deferred_handle(&mut client, "jobs").await;

    broker.inject(Op::Ack, Fault::Transient);
    let error = client.ack(&handle).await.unwrap_err();

    assert!(error.is_stale_handle());
    assert_eq!(broker.attempts(Op::Ack), 1);
    assert!(broker.acked().is_empty());
    assert_eq!(broker.ready("jobs"), 1);

    // the broker hands the message out again on the new channel
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let redelivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&redelivered);
    client
        .pull(["jobs"], 1, cancel, move |delivery| {
            sink.lock().unwrap().push(delivery.redelivered());
            token.cancel();
            async { Disposition::Ack }
        })
        .await
        .unwrap();

    assert_eq!(*redelivered.lock().unwrap(), vec![true]);
    assert_eq!(broker.acked(), vec![b"job".to_vec()]);
    assert_eq!(broker.unacked(), 0);
}

#[tokio::test]
async fn handle_from_earlier_connection_is_never_sent() {
    let broker = MemoryBroker::new();
    broker.enqueue("jobs", b"first".to_vec());
    broker.enqueue("jobs", b"second".to_vec());
    let mut client = client(&broker);

    let stale = deferred_handle(&mut client, "jobs").await;
    client.close().await.unwrap();
    let current = deferred_handle(&mut client, "jobs").await;
    assert_eq!(stale.tag(), current.tag());

    assert!(client.ack(&stale).await.unwrap_err().is_stale_handle());
    assert_eq!(broker.unacked(), 1);
    assert!(broker.acked().is_empty());
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn nack_requeues_by_default() {
    let broker = MemoryBroker::new();
    broker.enqueue("jobs", b"job".to_vec());
    let mut client = client(&broker);
    let handle = deferred_handle(&mut client, "jobs").await;

    client.nack(&handle).await.unwrap();

    assert_eq!(broker.nacked(), vec![(b"job".to_vec(), true)]);
    assert_eq!(broker.ready("jobs"), 1);
}

/// Pulls one message from `queue`, leaving it unsettled.
async fn deferred_handle(
    client: &mut amqp_recovery::Client<amqp_recovery::memory::MemoryTransport>,
    queue: &str,
) -> DeliveryHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&handle);
    client
        .pull([queue], 1, cancel, move |delivery| {
            *slot.lock().unwrap() = Some(delivery.handle().clone());
            token.cancel();
            async { Disposition::Defer }
        })
        .await
        .unwrap();
    let handle = handle.lock().unwrap().take();
    handle.expect("a delivery")
}
