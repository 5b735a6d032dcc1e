//! Request/reply round trip: built entirely on publish/subscribe, with no
//! dedicated bus primitive beyond `MessageBus::request`.

use std::sync::Arc;
use std::time::Duration;

use messaging_substrate::{BusConfig, Callback, MessageBuilder, MessageBus, StandaloneBackend};

#[tokio::test]
async fn request_reply_round_trip() {
    let backend = Arc::new(StandaloneBackend::new(2));
    let bus = MessageBus::new(backend, BusConfig::default());
    bus.start().unwrap();

    // A responder that echoes the correlation id back on the reply topic.
    let responder_bus = bus.clone();
    let responder: Callback = Arc::new(move |msg| {
        let reply = MessageBuilder::new()
            .topic("svc.echo.reply")
            .correlation_id(msg.correlation_id.clone())
            .payload(msg.payload.as_slice().to_vec())
            .build()
            .map_err(|e| e.to_string())?;
        responder_bus.publish(reply).map_err(|e| e.to_string())
    });
    bus.subscribe("svc.echo", responder, None).unwrap();

    let request = MessageBuilder::new()
        .topic("svc.echo")
        .correlation_id("c-42")
        .payload(b"ping".to_vec())
        .build()
        .unwrap();

    let reply = bus
        .request(request, "svc.echo.reply", Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(reply.correlation_id, "c-42");
    assert_eq!(reply.payload.as_slice(), b"ping");

    bus.stop();
}

#[tokio::test]
async fn request_times_out_without_a_responder() {
    let backend = Arc::new(StandaloneBackend::new(1));
    let bus = MessageBus::new(backend, BusConfig::default());
    bus.start().unwrap();

    let request = MessageBuilder::new().topic("svc.unanswered").build().unwrap();
    let err = bus
        .request(request, "svc.unanswered.reply", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "timeout");

    // The one-shot reply subscription must not leak past the timeout.
    assert_eq!(bus.get_statistics().subscriptions_active, 0);

    bus.stop();
}
