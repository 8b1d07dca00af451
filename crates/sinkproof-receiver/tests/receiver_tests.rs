//! Receivers end to end: real sockets, real TLS, captured into the store.

use sinkproof_ids::RunId;
use sinkproof_ports::TransportProvider;
use sinkproof_receiver::{CloudEventSender, LocalTransport, OutboundEvent};
use sinkproof_schema::TestScope;
use sinkproof_schema::event::EventKind;
use sinkproof_schema::resource::ReceiverOptions;
use sinkproof_store::EventStore;

fn scope() -> TestScope {
    TestScope::new("receiver-tests", RunId::now("test"))
}

fn timer_event() -> OutboundEvent {
    OutboundEvent::new("dev.knative.eventing.timer", "1", "/apis/v1/namespaces/ns/src")
        .with_json(&serde_json::json!({"message": "Hello"}))
}

#[tokio::test]
async fn tls_receiver_captures_event_with_token() {
    let transport = LocalTransport::new();
    let store = EventStore::new();
    let endpoint = transport
        .start_receiver(
            &scope(),
            &store,
            "sink",
            &ReceiverOptions::default().with_tls().with_audience("audience"),
        )
        .await
        .unwrap();
    assert!(endpoint.uri.starts_with("https://127.0.0.1:"));
    let ca = endpoint.ca_certs.as_deref().unwrap();

    let sender = CloudEventSender::new(&endpoint.uri, Some(ca)).unwrap();
    let status = sender
        .send(&timer_event().with_bearer_token("header.payload.sig"))
        .await
        .unwrap();
    assert_eq!(status, 202);

    let events = store.snapshot("sink");
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.kind, EventKind::EventReceived);
    assert_eq!(event.event_type.as_deref(), Some("dev.knative.eventing.timer"));
    assert_eq!(event.event_id.as_deref(), Some("1"));
    assert_eq!(
        event.security.bearer_token.as_deref(),
        Some("header.payload.sig")
    );
    let tls = event.security.tls.as_ref().expect("captured over TLS");
    assert!(tls.protocol.is_some());
    assert_eq!(event.payload_json().unwrap()["message"], "Hello");

    transport.stop_receiver(&scope(), "sink").await.unwrap();
    assert_eq!(transport.running(), 0);
}

#[tokio::test]
async fn missing_token_is_rejected_when_audience_expected() {
    let transport = LocalTransport::new();
    let store = EventStore::new();
    let endpoint = transport
        .start_receiver(
            &scope(),
            &store,
            "sink",
            &ReceiverOptions::default().with_tls().with_audience("audience"),
        )
        .await
        .unwrap();
    let sender = CloudEventSender::new(&endpoint.uri, endpoint.ca_certs.as_deref()).unwrap();

    assert_eq!(sender.send(&timer_event()).await.unwrap(), 401);
    let events = store.snapshot("sink");
    assert_eq!(events[0].kind, EventKind::EventRejected);
    assert_eq!(events[0].status_code, 401);
}

#[tokio::test]
async fn plain_receiver_without_audience_accepts_anything() {
    let transport = LocalTransport::new();
    let store = EventStore::new();
    let endpoint = transport
        .start_receiver(&scope(), &store, "plain", &ReceiverOptions::default())
        .await
        .unwrap();
    assert!(endpoint.uri.starts_with("http://"));
    assert!(endpoint.ca_certs.is_none());

    let sender = CloudEventSender::new(&endpoint.uri, None).unwrap();
    for i in 0..3 {
        let event = OutboundEvent::new("t", &i.to_string(), "/s");
        assert_eq!(sender.send(&event).await.unwrap(), 202);
    }

    let events = store.snapshot("plain");
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.security.tls.is_none()));
    let ids: Vec<_> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(ids, [0, 1, 2]);
}

#[tokio::test]
async fn foreign_ca_cannot_reach_tls_receiver() {
    let transport = LocalTransport::new();
    let store = EventStore::new();
    let a = transport
        .start_receiver(&scope(), &store, "a", &ReceiverOptions::default().with_tls())
        .await
        .unwrap();
    let b = transport
        .start_receiver(&scope(), &store, "b", &ReceiverOptions::default().with_tls())
        .await
        .unwrap();

    let sender = CloudEventSender::new(&a.uri, b.ca_certs.as_deref()).unwrap();
    assert!(sender.send(&timer_event()).await.is_err());
    assert!(store.is_empty("a"));
}

#[tokio::test]
async fn duplicate_receiver_name_is_an_error() {
    let transport = LocalTransport::new();
    let store = EventStore::new();
    transport
        .start_receiver(&scope(), &store, "sink", &ReceiverOptions::default())
        .await
        .unwrap();
    assert!(
        transport
            .start_receiver(&scope(), &store, "sink", &ReceiverOptions::default())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn stopped_receiver_refuses_connections() {
    let transport = LocalTransport::new();
    let store = EventStore::new();
    let endpoint = transport
        .start_receiver(&scope(), &store, "sink", &ReceiverOptions::default())
        .await
        .unwrap();
    transport.stop_receiver(&scope(), "sink").await.unwrap();

    let sender = CloudEventSender::new(&endpoint.uri, None).unwrap();
    assert!(sender.send(&timer_event()).await.is_err());
}
