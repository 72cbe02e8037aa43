//! NATS Message Bus Client Tests

use futures::StreamExt;
use keyward_types::{Event, EventType, KeyRotationRequestedPayload, RotationType};
use message_bus_client::nats::NatsClient;
use message_bus_client::traits::MessageBusClient;

fn rotation_request() -> Event {
    let payload = KeyRotationRequestedPayload {
        organization_id: "org-nats".to_string(),
        rotation_type: RotationType::Manual,
        reason: None,
        requested_by: Some("integration-test".to_string()),
    };
    Event::new(EventType::KeyRotationRequested, "test", payload).unwrap()
}

#[tokio::test]
#[ignore] // Requires NATS server running
async fn test_nats_client_connection() {
    let client = NatsClient::new("nats://localhost:4222", None).await.unwrap();
    assert!(client.is_connected().await);
    assert_eq!(client.client_type(), "nats");
    assert_eq!(client.stream_name(), "keyward-events");
}

#[tokio::test]
#[ignore] // Requires NATS server running
async fn test_nats_client_publish() {
    let client = NatsClient::new("nats://localhost:4222", None)
        .await
        .unwrap();

    let result = client.publish(&rotation_request()).await;
    assert!(result.is_ok());
}

#[tokio::test]
#[ignore] // Requires NATS server running
async fn test_nats_client_publish_and_subscribe() {
    let client = NatsClient::new("nats://localhost:4222", None)
        .await
        .unwrap();

    let mut stream = client.subscribe("key.rotation.requested");

    // Give the subscription task time to register
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    client.publish(&rotation_request()).await.unwrap();

    let received = tokio::time::timeout(tokio::time::Duration::from_secs(2), stream.next())
        .await
        .expect("no event within timeout")
        .expect("stream ended")
        .expect("event error");
    assert_eq!(received.event_type, EventType::KeyRotationRequested);
}
