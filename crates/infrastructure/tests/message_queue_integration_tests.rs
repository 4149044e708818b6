//! RabbitMQ集成测试，需要Docker：`cargo test -- --ignored`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lapin::options::QueueDeclareOptions;
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use serde_json::json;
use tokio::sync::mpsc;

use taskhub_core::Context;
use taskhub_errors::{AppError, ReasonCode};
use taskhub_infrastructure::{
    queue_handler, Action, ConsumerOptions, Message, PublishOptions, QueueManager,
    QueueManagerOptions,
};
use taskhub_testing_utils::RabbitMqTestContainer;

fn manager_options(url: &str) -> QueueManagerOptions {
    QueueManagerOptions {
        url: url.to_string(),
        exchange: "taskhub.test".to_string(),
        reconnect_delay: Duration::from_millis(500),
        connection_timeout: Duration::from_secs(30),
    }
}

async fn pending_messages(url: &str, queue: &str) -> u32 {
    let connection = Connection::connect(url, ConnectionProperties::default())
        .await
        .unwrap();
    let channel = connection.create_channel().await.unwrap();
    let declared = channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap();
    let count = declared.message_count();
    connection.close(200, "测试结束").await.unwrap();
    count
}

fn test_consumer_options() -> ConsumerOptions {
    ConsumerOptions::default()
        .with_exchange("ex.test")
        .with_routing_key("q.test")
        .with_concurrency(1)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_publish_and_ack_round_trip() {
    let rabbit = RabbitMqTestContainer::new().await.unwrap();
    let manager = QueueManager::connect(manager_options(&rabbit.url)).await.unwrap();
    let invocations = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let counter = invocations.clone();
    manager
        .register_consumer(
            "c1",
            "q.test",
            queue_handler(move |_ctx, msg: Message| {
                let tx = tx.clone();
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let payload: serde_json::Value = match msg.json() {
                        Ok(payload) => payload,
                        Err(e) => return (Action::NackDiscard, Err(e)),
                    };
                    let _ = tx.send((msg.body.clone(), payload["n"].as_i64()));
                    (Action::Ack, Ok(()))
                }
            }),
            test_consumer_options(),
        )
        .await
        .unwrap();
    assert_eq!(manager.list_consumers().await, vec!["c1".to_string()]);
    assert_eq!(manager.consumer_queue("c1").await.as_deref(), Some("q.test"));

    let payload = json!({"n": 42});
    manager
        .publish_task(
            &Context::background(),
            "q.test",
            &payload,
            PublishOptions::default().with_exchange("ex.test"),
        )
        .await
        .unwrap();

    let (body, n) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message delivered within 5s")
        .unwrap();
    assert_eq!(body, serde_json::to_vec(&payload).unwrap());
    assert_eq!(n, Some(42));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pending_messages(&rabbit.url, "q.test").await, 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    manager.stop_all_consumers().await.unwrap();
    assert!(manager.list_consumers().await.is_empty());
    manager.close().await.unwrap();
    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_requeue_with_delay_until_ack() {
    let rabbit = RabbitMqTestContainer::new().await.unwrap();
    let manager = QueueManager::connect(manager_options(&rabbit.url)).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::<Instant>::new()));

    let recorder = seen.clone();
    manager
        .register_consumer(
            "c2",
            "q.test",
            queue_handler(move |_ctx, _msg| {
                let recorder = recorder.clone();
                async move {
                    let attempt = {
                        let mut seen = recorder.lock().unwrap();
                        seen.push(Instant::now());
                        seen.len()
                    };
                    if attempt <= 3 {
                        (
                            Action::NackRequeue,
                            Err(AppError::internal(format!("attempt {attempt} failed"))),
                        )
                    } else {
                        (Action::Ack, Ok(()))
                    }
                }
            }),
            test_consumer_options().with_requeue_delay(Duration::from_millis(200)),
        )
        .await
        .unwrap();

    manager
        .publish_task(
            &Context::background(),
            "q.test",
            &json!({"n": 42}),
            PublishOptions::default().with_exchange("ex.test"),
        )
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.lock().unwrap().len() < 4 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 4);
    for pair in seen.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(200));
    }
    assert_eq!(pending_messages(&rabbit.url, "q.test").await, 0);
    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_discard_and_manual_ack() {
    let rabbit = RabbitMqTestContainer::new().await.unwrap();
    let manager = QueueManager::connect(manager_options(&rabbit.url)).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager
        .register_consumer(
            "manual",
            "q.manual",
            queue_handler(move |_ctx, msg: Message| {
                let tx = tx.clone();
                async move {
                    let result = if msg.routing_key == "q.manual" {
                        msg.nack(false).await
                    } else {
                        msg.ack().await
                    };
                    let _ = tx.send(msg.correlation_id().map(str::to_string));
                    (Action::Manual, result)
                }
            }),
            ConsumerOptions::default().with_concurrency(2).with_prefetch(4),
        )
        .await
        .unwrap();

    manager
        .publish_task(
            &Context::background(),
            "q.manual",
            &json!({"discard": true}),
            PublishOptions::default()
                .with_correlation_id("corr-42")
                .with_priority(200)
                .with_expiration_milliseconds(60_000),
        )
        .await
        .unwrap();

    let correlation = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(correlation.as_deref(), Some("corr-42"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pending_messages(&rabbit.url, "q.manual").await, 0);

    manager.stop_consumer("manual").await.unwrap();
    manager.stop_consumer("manual").await.unwrap();
    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_register_validation_and_duplicates() {
    let rabbit = RabbitMqTestContainer::new().await.unwrap();
    let manager = QueueManager::connect(manager_options(&rabbit.url)).await.unwrap();
    let handler = queue_handler(|_ctx, _msg| async { (Action::Ack, Ok(())) });

    assert!(manager
        .register_consumer("", "q", handler.clone(), ConsumerOptions::default())
        .await
        .is_err());
    assert!(manager
        .register_consumer("c", "", handler.clone(), ConsumerOptions::default())
        .await
        .is_err());
    let idle = ConsumerOptions {
        concurrency: 0,
        ..Default::default()
    };
    assert!(matches!(
        manager.register_consumer("c0", "q.idle", handler.clone(), idle).await,
        Err(AppError::InvalidArgument(_))
    ));
    assert!(manager.list_consumers().await.is_empty());

    manager
        .register_consumer("c", "q.dup", handler.clone(), ConsumerOptions::default())
        .await
        .unwrap();
    assert!(manager
        .register_consumer("c", "q.dup", handler, ConsumerOptions::default())
        .await
        .is_err());
    assert_eq!(manager.tasks_exchange(), "taskhub.test");

    manager.close().await.unwrap();
    assert!(manager
        .publish_task(&Context::background(), "q.dup", &json!({}), PublishOptions::default())
        .await
        .is_err());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stop_consumer_lets_in_flight_handler_finish() {
    let rabbit = RabbitMqTestContainer::new().await.unwrap();
    let manager = QueueManager::connect(manager_options(&rabbit.url)).await.unwrap();
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let finished = Arc::new(AtomicUsize::new(0));

    let done = finished.clone();
    manager
        .register_consumer(
            "slow",
            "q.slow",
            queue_handler(move |ctx: Context, _msg| {
                let started_tx = started_tx.clone();
                let done = done.clone();
                async move {
                    let _ = started_tx.send(());
                    if ctx.sleep(Duration::from_millis(500)).await.is_err() {
                        return (Action::NackRequeue, Err(AppError::Cancelled));
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                    (Action::Ack, Ok(()))
                }
            }),
            ConsumerOptions::default(),
        )
        .await
        .unwrap();

    manager
        .publish_task(&Context::background(), "q.slow", &json!({"job": 1}), PublishOptions::default())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), started_rx.recv())
        .await
        .unwrap()
        .unwrap();

    manager.stop_consumer("slow").await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(pending_messages(&rabbit.url, "q.slow").await, 0);
    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_register_racing_close_leaves_no_consumer() {
    let rabbit = RabbitMqTestContainer::new().await.unwrap();
    let manager = QueueManager::connect(manager_options(&rabbit.url)).await.unwrap();
    let handler = queue_handler(|_ctx, _msg| async { (Action::Ack, Ok(())) });

    let (registered, closed) = tokio::join!(
        manager.register_consumer("late", "q.late", handler, ConsumerOptions::default()),
        manager.close(),
    );
    closed.unwrap();
    if let Err(e) = registered {
        assert_eq!(e.reason(), Some(ReasonCode::InvalidState), "unexpected error: {e}");
    }
    assert!(manager.list_consumers().await.is_empty());
}
