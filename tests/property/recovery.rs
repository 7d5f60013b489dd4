//! Property tests for recovery under injected faults.
//!
//! Invariants tested:
//! - Recoverable faults never duplicate or drop a publish
//! - At most one connection is live after any operation
//! - A deferred settlement is applied at most once and never loses the message
//! - A rejection is never retried

use amqp_recovery::memory::{Fault, MemoryBroker, MemoryTransport, Op};
use amqp_recovery::{Client, DeliveryHandle, Disposition};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn recoverable_fault() -> impl Strategy<Value = Fault> {
    prop_oneof![Just(Fault::Transient), Just(Fault::ChannelInvalid)]
}

fn push_op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::DeclareQueue), Just(Op::Publish)]
}

fn client(broker: &MemoryBroker) -> Client<MemoryTransport> {
    Client::new(broker.transport(), "amqp://localhost")
}

async fn deferred_handle(client: &mut Client<MemoryTransport>, queue: &str) -> DeliveryHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let slot = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    client
        .pull([queue], 1, cancel, move |delivery| {
            *sink.lock().unwrap() = Some(delivery.handle().clone());
            token.cancel();
            async { Disposition::Defer }
        })
        .await
        .unwrap();
    let handle = slot.lock().unwrap().take();
    handle.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: Each push publishes exactly once regardless of recoverable faults
    #[test]
    fn push_publishes_exactly_once(
        faults in prop::collection::vec((push_op(), recoverable_fault()), 0..8),
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 1..5),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let broker = MemoryBroker::new();
            for (op, fault) in &faults {
                broker.inject(*op, *fault);
            }
            let mut client = client(&broker);

            for body in &bodies {
                client.push(body, "q1", None).await.unwrap();
                prop_assert!(broker.live_connections() <= 1);
            }

            let published: Vec<_> = broker.published().into_iter().map(|p| p.body).collect();
            prop_assert_eq!(published, bodies.clone());
            prop_assert_eq!(broker.ready("q1"), bodies.len());
            prop_assert_eq!(broker.live_connections(), 1);
            prop_assert_eq!(client.status().reconnects() as usize, faults.len());

            Ok(())
        })?;
    }

    /// Property: Faulted runs leave the same broker state as a clean run
    #[test]
    fn faults_do_not_change_side_effects(
        faults in prop::collection::vec((push_op(), recoverable_fault()), 1..6),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let clean = MemoryBroker::new();
            let faulted = MemoryBroker::new();
            for (op, fault) in &faults {
                faulted.inject(*op, *fault);
            }

            for broker in [&clean, &faulted] {
                let mut client = client(broker);
                client.push(b"a", "q1", None).await.unwrap();
                client.push(b"b", "q2", None).await.unwrap();
            }

            prop_assert_eq!(clean.published(), faulted.published());
            prop_assert_eq!(clean.ready("q1"), faulted.ready("q1"));
            prop_assert_eq!(clean.ready("q2"), faulted.ready("q2"));
            prop_assert_eq!(clean.count(Op::Publish), faulted.count(Op::Publish));

            Ok(())
        })?;
    }

    /// Property: A deferred ack is applied at most once and its message is never lost
    #[test]
    fn deferred_ack_is_applied_or_requeued(
        faults in prop::collection::vec(recoverable_fault(), 0..6),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let broker = MemoryBroker::new();
            broker.enqueue("jobs", b"job".to_vec());
            let mut client = client(&broker);
            let handle = deferred_handle(&mut client, "jobs").await;

            for fault in &faults {
                broker.inject(Op::Ack, *fault);
            }
            let result = client.ack(&handle).await;

            if faults.is_empty() {
                prop_assert!(result.is_ok());
                prop_assert_eq!(broker.acked(), vec![b"job".to_vec()]);
            } else {
                // the delivering channel died, so the tag must not be reused
                prop_assert!(result.unwrap_err().is_stale_handle());
                prop_assert!(broker.acked().is_empty());
                prop_assert_eq!(broker.ready("jobs"), 1);
            }
            prop_assert_eq!(broker.attempts(Op::Ack), 1);
            prop_assert_eq!(broker.acked().len() + broker.ready("jobs"), 1);
            prop_assert_eq!(broker.unacked(), 0);

            Ok(())
        })?;
    }

    /// Property: A rejection ends the operation after a single attempt
    #[test]
    fn rejection_is_never_retried(
        recoverable in prop::collection::vec(recoverable_fault(), 0..4),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let broker = MemoryBroker::new();
            for fault in &recoverable {
                broker.inject(Op::Publish, *fault);
            }
            broker.inject(Op::Publish, Fault::Rejected);
            let mut client = client(&broker);

            let error = client.push(b"x", "q1", None).await.unwrap_err();

            prop_assert!(error.is_rejected());
            prop_assert_eq!(broker.attempts(Op::Publish), recoverable.len() + 1);
            prop_assert!(broker.published().is_empty());

            Ok(())
        })?;
    }
}
