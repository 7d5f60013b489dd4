use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use amqp_recovery::memory::{Fault, MemoryBroker, MemoryTransport, Op};
use amqp_recovery::{Client, ClientConfig, ClientEvent, Disposition, ErrorKind};
use tokio_util::sync::CancellationToken;

type Recorded = Arc<Mutex<Vec<ClientEvent>>>;

fn recording_client(broker: &MemoryBroker) -> (Client<MemoryTransport>, Recorded) {
    let events: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let config = ClientConfig::builder()
        .name("recorder")
        .on_event(move |event| sink.lock().unwrap().push(event.clone()))
        .build();
    let client = Client::with_config(broker.transport(), "amqp://localhost", config);
    (client, events)
}

fn types(events: &Recorded) -> Vec<&'static str> {
    events
        .lock()
        .unwrap()
        .iter()
        .map(ClientEvent::event_type)
        .collect()
}

#[tokio::test]
async fn clean_push_emits_connected_then_succeeded() {
    let broker = MemoryBroker::new();
    let (mut client, events) = recording_client(&broker);

    client.push(b"x", "q1", None).await.unwrap();

    assert_eq!(types(&events), vec!["Connected", "Succeeded"]);
    let events = events.lock().unwrap();
    assert!(matches!(events[0], ClientEvent::Connected { generation: 1, .. }));
    assert!(matches!(
        events[1],
        ClientEvent::Succeeded {
            operation: "push",
            attempts: 1,
            ..
        }
    ));
    assert!(events.iter().all(|event| event.client_name() == "recorder"));
}

#[tokio::test]
async fn transient_failure_reports_recovery_and_reconnect() {
    let broker = MemoryBroker::new();
    let (mut client, events) = recording_client(&broker);

    broker.inject(Op::Publish, Fault::Transient);
    client.push(b"x", "q1", None).await.unwrap();

    assert_eq!(
        types(&events),
        vec![
            "Connected",
            "Recovering",
            "Disconnected",
            "Connected",
            "Succeeded"
        ]
    );
    let events = events.lock().unwrap();
    assert!(matches!(
        events[1],
        ClientEvent::Recovering {
            operation: "push",
            kind: ErrorKind::TransientConnectionFailure,
            attempt: 1,
            ..
        }
    ));
    // the broken connection reported itself as closed
    assert!(matches!(
        events[2],
        ClientEvent::Disconnected {
            already_closed: true,
            ..
        }
    ));
    assert!(matches!(events[3], ClientEvent::Connected { generation: 2, .. }));
    assert!(matches!(events[4], ClientEvent::Succeeded { attempts: 2, .. }));
}

#[tokio::test]
async fn channel_invalid_closes_the_live_connection() {
    let broker = MemoryBroker::new();
    let (mut client, events) = recording_client(&broker);

    broker.inject(Op::DeclareQueue, Fault::ChannelInvalid);
    client.push(b"x", "q1", None).await.unwrap();

    let events = events.lock().unwrap();
    assert!(matches!(
        events[1],
        ClientEvent::Recovering {
            kind: ErrorKind::ChannelInvalid,
            ..
        }
    ));
    assert!(matches!(
        events[2],
        ClientEvent::Disconnected {
            already_closed: false,
            ..
        }
    ));
}

#[tokio::test]
async fn recovery_attempts_are_numbered() {
    let broker = MemoryBroker::new();
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&attempts);
    let config = ClientConfig::builder()
        .on_recovering(move |operation, kind, attempt| {
            sink.lock().unwrap().push((operation, kind, attempt));
        })
        .build();
    let mut client = Client::with_config(broker.transport(), "amqp://localhost", config);

    broker.inject(Op::Publish, Fault::Transient);
    broker.inject(Op::Publish, Fault::ChannelInvalid);
    client.push(b"x", "q1", None).await.unwrap();

    assert_eq!(
        *attempts.lock().unwrap(),
        vec![
            ("push", ErrorKind::TransientConnectionFailure, 1),
            ("push", ErrorKind::ChannelInvalid, 2),
        ]
    );
}

#[tokio::test]
async fn rejection_is_reported_once() {
    let broker = MemoryBroker::new();
    let rejected = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&rejected);
    let config = ClientConfig::builder()
        .on_rejected(move |operation| {
            assert_eq!(operation, "push");
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let mut client = Client::with_config(broker.transport(), "amqp://localhost", config);

    broker.inject(Op::Publish, Fault::Rejected);
    assert!(client.push(b"x", "q1", None).await.is_err());

    assert_eq!(rejected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn consume_reports_start_and_stop() {
    let broker = MemoryBroker::new();
    broker.enqueue("jobs", b"one".to_vec());
    let (mut client, events) = recording_client(&broker);

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    client
        .pull(["jobs"], 4, cancel, move |_| {
            token.cancel();
            async { Disposition::Ack }
        })
        .await
        .unwrap();

    assert_eq!(
        types(&events),
        vec!["Connected", "ConsumerStarted", "ConsumerStopped", "Succeeded"]
    );
    let events = events.lock().unwrap();
    match &events[1] {
        ClientEvent::ConsumerStarted {
            queues, prefetch, ..
        } => {
            assert_eq!(queues, &vec!["jobs".to_string()]);
            assert_eq!(*prefetch, 4);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(
        events[2],
        ClientEvent::ConsumerStopped {
            deliveries: 1,
            cancelled: true,
            ..
        }
    ));
}

#[tokio::test]
async fn on_connected_sees_each_generation() {
    let broker = MemoryBroker::new();
    let generations = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&generations);
    let config = ClientConfig::builder()
        .on_connected(move |generation| sink.lock().unwrap().push(generation))
        .build();
    let mut client = Client::with_config(broker.transport(), "amqp://localhost", config);

    client.connect().await.unwrap();
    broker.kill_connections();
    client.push(b"x", "q1", None).await.unwrap();

    assert_eq!(*generations.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn panicking_listener_does_not_break_the_client() {
    let broker = MemoryBroker::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let config = ClientConfig::builder()
        .on_event(|_| panic!("listener failure"))
        .on_event(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let mut client = Client::with_config(broker.transport(), "amqp://localhost", config);

    client.push(b"x", "q1", None).await.unwrap();

    assert_eq!(broker.published().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
