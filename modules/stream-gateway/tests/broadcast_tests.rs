mod common;

use common::RecordingObserver;
use std::sync::Arc;
use stream_gateway::broadcast::{BroadcastManager, Observer};
use stream_gateway::metrics::Metrics;
use stream_gateway::models::StreamMessage;

#[tokio::test]
async fn test_failed_observer_is_pruned_others_still_receive() {
    let metrics = Metrics::new();
    let manager = BroadcastManager::new(metrics.clone());

    let healthy: Vec<Arc<RecordingObserver>> = (0..3).map(|_| RecordingObserver::new()).collect();
    for observer in &healthy {
        manager.connect(observer.clone()).await;
    }
    let broken = RecordingObserver::failing();
    manager.connect(broken.clone()).await;
    assert_eq!(manager.count().await, 4);

    let delivered = manager.broadcast(&StreamMessage::Pong).await;

    assert_eq!(delivered, 3);
    assert_eq!(manager.count().await, 3);
    for observer in &healthy {
        assert_eq!(observer.kinds(), vec!["pong"]);
    }
    assert_eq!(metrics.observers_pruned_total.get(), 1);
    assert_eq!(metrics.websocket_connections.get(), 3);

    // The pruned observer is gone for good
    let delivered = manager.broadcast(&StreamMessage::Pong).await;
    assert_eq!(delivered, 3);
    assert_eq!(manager.count().await, 3);
}

#[tokio::test]
async fn test_every_observer_sees_messages_in_broadcast_order() {
    let manager = BroadcastManager::new(Metrics::new());
    let first = RecordingObserver::new();
    let second = RecordingObserver::new();
    manager.connect(first.clone()).await;
    manager.connect(second.clone()).await;

    manager
        .broadcast(&StreamMessage::ScenarioStarted {
            scenario: "incident".to_string(),
            name: "Production Incident".to_string(),
        })
        .await;
    manager.broadcast(&StreamMessage::Pong).await;

    let expected = vec!["scenario_started", "pong"];
    assert_eq!(first.kinds(), expected);
    assert_eq!(second.kinds(), expected);
    assert_eq!(first.frames()[0]["name"], "Production Incident");
}

#[tokio::test]
async fn test_disconnected_observer_receives_nothing() {
    let manager = BroadcastManager::new(Metrics::new());
    let stays = RecordingObserver::new();
    let leaves = RecordingObserver::new();
    manager.connect(stays.clone()).await;
    let id = manager.connect(leaves.clone()).await;

    assert!(manager.disconnect(id).await);
    manager.broadcast(&StreamMessage::Pong).await;

    assert_eq!(stays.frames().len(), 1);
    assert!(leaves.frames().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connect_disconnect_and_broadcast() {
    let manager = Arc::new(BroadcastManager::new(Metrics::new()));
    let anchor = RecordingObserver::new();
    manager.connect(anchor.clone()).await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..25 {
                let observer: Arc<dyn Observer> = RecordingObserver::new();
                let id = manager.connect(observer).await;
                manager.broadcast(&StreamMessage::Pong).await;
                assert!(manager.disconnect(id).await);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(manager.count().await, 1);
    assert_eq!(anchor.frames().len(), 16 * 25);
}
