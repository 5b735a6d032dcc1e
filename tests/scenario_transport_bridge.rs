//! Two buses bridged by framed TCP transports, one direction exercised:
//! a publish on B's bus arrives as a delivery on A's bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use messaging_substrate::transport::{MessageHandler, OutboundTransport, TcpTransport, TransportConfig};
use messaging_substrate::{BusConfig, BusMode, Callback, MessageBuilder, MessageBus, StandaloneBackend};
use tokio::net::TcpListener;

async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn transport_bridges_a_publish_across_two_buses() {
    // Bus A: receives over the transport and delivers locally.
    let backend_a = Arc::new(StandaloneBackend::new(1));
    let mut config_a = BusConfig::default();
    config_a.mode = BusMode::LocalOnly;
    let bus_a = MessageBus::new(backend_a, config_a);
    bus_a.start().unwrap();

    let invocations = Arc::new(AtomicU64::new(0));
    let invocations_clone = invocations.clone();
    let c_a: Callback = Arc::new(move |_msg| {
        invocations_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    bus_a.subscribe("x.y", c_a, None).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // The server-side transport's message handler republishes into bus A.
    let bus_a_for_handler = bus_a.clone();
    let server_handler: MessageHandler = Arc::new(move |message| {
        let _ = bus_a_for_handler.publish(message);
    });
    let accept_task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        TcpTransport::from_stream(stream, TransportConfig::default(), server_handler, None)
    });

    let client_handler: MessageHandler = Arc::new(|_msg| {});
    let client_transport = TcpTransport::connect(addr, TransportConfig::default(), client_handler, None)
        .await
        .unwrap();
    let server_transport = accept_task.await.unwrap();

    // Bus B: remote-only, forwards every publish over its transport.
    let backend_b = Arc::new(StandaloneBackend::new(1));
    let mut config_b = BusConfig::default();
    config_b.mode = BusMode::RemoteOnly;
    config_b.transport = Some(client_transport.clone() as Arc<dyn OutboundTransport>);
    let bus_b = MessageBus::new(backend_b, config_b);
    bus_b.start().unwrap();

    bus_b
        .publish(MessageBuilder::new().topic("x.y").build().unwrap())
        .unwrap();

    assert!(wait_until(|| invocations.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(client_transport.stats().messages_sent, 1);
    assert_eq!(server_transport.stats().messages_received, 1);

    bus_a.stop();
    bus_b.stop();
}
