//! Queue behaviour with real modes and concurrent producers.

use std::sync::Arc;
use std::time::Duration;

use hapi_core::{EnhancedMode, ModeAwareQueue, PermissionMode, QueueError, hash_mode};
use tokio_util::sync::CancellationToken;

fn mode_queue() -> ModeAwareQueue<EnhancedMode> {
    ModeAwareQueue::new(hash_mode::<EnhancedMode>)
}

#[tokio::test]
async fn test_incompatible_modes_never_share_a_batch() {
    let queue = mode_queue();
    let read_only = EnhancedMode::new(PermissionMode::ReadOnly);
    let yolo = EnhancedMode::new(PermissionMode::Yolo);

    queue.push("local1", read_only.clone()).unwrap();
    queue.push("local2", read_only.clone()).unwrap();
    queue.push("remote1", yolo.clone()).unwrap();
    queue.push("remote2", yolo.clone()).unwrap();

    let first = queue.wait_for_batch(None).await.unwrap();
    assert_eq!(first.message, "local1\nlocal2");
    assert_eq!(first.mode, read_only);
    assert_eq!(queue.size(), 2);

    let second = queue.wait_for_batch(None).await.unwrap();
    assert_eq!(second.message, "remote1\nremote2");
    assert_eq!(second.hash, hash_mode(&yolo));
    assert_eq!(queue.size(), 0);
}

#[tokio::test]
async fn test_isolated_command_discards_backlog() {
    let queue = mode_queue();
    let mode = EnhancedMode::new(PermissionMode::Default);

    queue.push("a", mode.clone()).unwrap();
    queue.push("b", mode.clone()).unwrap();
    queue.push_isolate_and_clear("/compact", mode.clone()).unwrap();
    assert_eq!(queue.size(), 1);

    let batch = queue.wait_for_batch(None).await.unwrap();
    assert_eq!(batch.message, "/compact");
    assert!(batch.isolate);
    assert_eq!(queue.size(), 0);
}

#[tokio::test]
async fn test_consumer_receives_items_from_concurrent_producers() {
    let queue = Arc::new(mode_queue());
    let consumer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(batch) = queue.wait_for_batch(None).await {
                received.extend(batch.message.lines().map(String::from));
            }
            received
        })
    };

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for n in 0..5 {
                    let mode = EnhancedMode::new(PermissionMode::Default)
                        .with_model(format!("model-{}", n % 2));
                    queue.push(format!("p{producer}-{n}"), mode).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    while queue.size() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    queue.close();

    let mut received = consumer.await.unwrap();
    received.sort();
    assert_eq!(received.len(), 20);
    assert!(received.contains(&"p3-4".to_string()));
}

#[tokio::test]
async fn test_cancelled_wait_does_not_poison_queue() {
    let queue = mode_queue();
    let token = CancellationToken::new();
    token.cancel();
    assert!(queue.wait_for_batch(Some(&token)).await.is_none());

    queue.push("still here", EnhancedMode::default()).unwrap();
    let fresh = CancellationToken::new();
    let batch = queue.wait_for_batch(Some(&fresh)).await.unwrap();
    assert_eq!(batch.message, "still here");
}

#[tokio::test]
async fn test_close_rejects_and_reset_reopens() {
    let queue = mode_queue();
    queue.close();
    assert!(matches!(
        queue.push("x", EnhancedMode::default()),
        Err(QueueError::Closed { operation: "push" })
    ));

    queue.reset();
    assert!(!queue.is_closed());
    queue.unshift("y", EnhancedMode::default()).unwrap();
    assert_eq!(queue.size(), 1);
}
