//! End-to-end tests for the shared state server and its remote proxies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use scan_coordinator::error::CoordinatorError;
use scan_coordinator::lifecycle::startup::{CAPTCHA_QUEUE, EXTRA_QUEUE, WORKER_DICT};
use scan_coordinator::lifecycle::Coordinator;
use scan_coordinator::server::{ConnectionContext, SharedStateClient, SharedStateServer};

mod common;

#[tokio::test]
async fn test_worker_dict_unpublished_and_queues_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), false))
        .await
        .unwrap();
    let client = coordinator.client();

    let err = client.table(WORKER_DICT).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::NotRegistered(ref name) if name == WORKER_DICT));

    for name in [CAPTCHA_QUEUE, EXTRA_QUEUE] {
        let queue = client.queue(name).await.unwrap();
        for item in ["a", "b", "c"] {
            queue.put(&item).await.unwrap();
        }
        assert_eq!(queue.len().await.unwrap(), 3);

        let mut drained = Vec::new();
        for _ in 0..3 {
            let item: String = queue.get(Some(Duration::from_secs(1))).await.unwrap();
            drained.push(item);
        }
        assert_eq!(drained, vec!["a", "b", "c"]);
    }

    coordinator.server().shutdown().await;
}

#[tokio::test]
async fn test_remote_items_reach_local_queue() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), false))
        .await
        .unwrap();

    let queue = coordinator.client().queue(CAPTCHA_QUEUE).await.unwrap();
    queue.put(&json!({ "account": "ash" })).await.unwrap();

    let local = coordinator.captcha_queue();
    assert_eq!(local.len(), 1);
    assert_eq!(local.try_dequeue().unwrap()["account"], "ash");

    coordinator.server().shutdown().await;
}

#[tokio::test]
async fn test_remote_wait_and_pop_errors() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), false))
        .await
        .unwrap();
    let queue = coordinator.client().queue(EXTRA_QUEUE).await.unwrap();

    let err = queue
        .get::<Value>(Some(Duration::from_millis(100)))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CoordinatorError::Empty));

    for i in 0..3 {
        queue.put(&i).await.unwrap();
    }
    let err = queue.wait_until_below(2, Some(0.2)).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::Full));

    let err = queue.wait_until_below(2, Some(-1.0)).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::InvalidArgument(_)));

    assert!(queue.wait_until_below(0, Some(0.0)).await.is_ok());
    assert!(queue.wait_until_below(10, None).await.is_ok());

    coordinator.server().shutdown().await;
}

#[tokio::test]
async fn test_remote_wait_released_by_local_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), false))
        .await
        .unwrap();
    let queue = coordinator.client().queue(CAPTCHA_QUEUE).await.unwrap();
    queue.put(&"x").await.unwrap();
    queue.put(&"y").await.unwrap();

    let local = Arc::clone(coordinator.captcha_queue());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        local.try_dequeue();
    });

    let waited = queue.wait_until_below(2, Some(5.0)).await.unwrap();
    assert!(waited >= Duration::from_millis(50));

    coordinator.server().shutdown().await;
}

#[tokio::test]
async fn test_worker_table_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), true))
        .await
        .unwrap();
    let table = coordinator.client().table(WORKER_DICT).await.unwrap();

    assert!(table.set("0", &json!({ "status": "scanning" })).await.unwrap().is_none());
    table.set("1", &json!({ "status": "idle" })).await.unwrap();

    let status: Option<Value> = table.get("0").await.unwrap();
    assert_eq!(status.unwrap()["status"], "scanning");
    assert_eq!(table.len().await.unwrap(), 2);

    let removed = table.remove("1").await.unwrap();
    assert_eq!(removed.unwrap()["status"], "idle");
    assert_eq!(table.items().await.unwrap().len(), 1);

    // Same table the coordinator holds.
    assert_eq!(coordinator.worker_dict().unwrap().len(), 1);

    let err = coordinator.client().queue(WORKER_DICT).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::WrongKind(_)));

    coordinator.server().shutdown().await;
}

#[tokio::test]
async fn test_abandoned_remote_get_does_not_consume_items() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), false))
        .await
        .unwrap();
    let queue = coordinator.client().queue(CAPTCHA_QUEUE).await.unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(200), queue.get::<Value>(None)).await;
    assert!(abandoned.is_err());

    let local = coordinator.captcha_queue();
    local.enqueue(json!("x"));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(local.len(), 1);

    let item: String = queue.get(Some(Duration::from_secs(1))).await.unwrap();
    assert_eq!(item, "x");
    assert!(local.is_empty());

    coordinator.server().shutdown().await;
}

#[tokio::test]
async fn test_root_cancellation_leaves_connections_serving() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), false))
        .await
        .unwrap();

    assert!(coordinator.scheduler().cancel_root());
    let queue = coordinator.client().queue(EXTRA_QUEUE).await.unwrap();
    queue.put(&"after-interrupt").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);

    coordinator.server().shutdown().await;
}

#[tokio::test]
async fn test_second_bind_is_address_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), false))
        .await
        .unwrap();

    let err = SharedStateServer::bind(coordinator.endpoint(), common::AUTHKEY, 8)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CoordinatorError::AddressInUse { .. }));
    assert!(err.to_string().contains("manager.address"));

    // The failed bind leaves the running server untouched.
    let resources = coordinator.client().resources().await.unwrap();
    assert_eq!(resources.len(), 2);
    let queue = coordinator.client().queue(CAPTCHA_QUEUE).await.unwrap();
    queue.put(&"still-served").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);

    coordinator.server().shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_in_use_and_removed_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::unix_config(dir.path());
    let socket = dir.path().join("coordinator.sock");

    let coordinator = Coordinator::start(config.clone()).await.unwrap();
    assert!(socket.exists());

    let err = Coordinator::start(config).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::AddressInUse { .. }));
    assert!(err.to_string().contains(&format!("rm {}", socket.display())));

    let queue = coordinator.client().queue(CAPTCHA_QUEUE).await.unwrap();
    queue.put(&"over-unix").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);

    coordinator.server().shutdown().await;
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_wrong_authkey_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), false))
        .await
        .unwrap();

    let intruder = SharedStateClient::new(coordinator.endpoint().clone(), "guess");
    let err = intruder.resources().await.err().unwrap();
    assert!(matches!(err, CoordinatorError::Unauthorized));

    let resources = coordinator.client().resources().await.unwrap();
    let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec![CAPTCHA_QUEUE, EXTRA_QUEUE]);

    coordinator.server().shutdown().await;
}

#[tokio::test]
async fn test_lookups_fail_after_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::start(common::test_config(dir.path(), true))
        .await
        .unwrap();
    let client = coordinator.client();
    client.queue(CAPTCHA_QUEUE).await.unwrap();

    coordinator.server().shutdown().await;
    // Second call is a no-op.
    coordinator.server().shutdown().await;
    assert!(coordinator.server().is_closed());

    let err = coordinator.server().lookup(CAPTCHA_QUEUE).err().unwrap();
    assert!(matches!(err, CoordinatorError::ServerClosed));

    let err = client.queue(CAPTCHA_QUEUE).await.err().unwrap();
    assert!(matches!(err, CoordinatorError::ServerClosed));
}

#[tokio::test]
async fn test_child_init_runs_once_per_connection() {
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let hook = Arc::new(move |ctx: &ConnectionContext| {
        assert!(!ctx.stop.is_cancelled());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let coordinator = Coordinator::start_with_hook(common::test_config(dir.path(), false), hook)
        .await
        .unwrap();
    let client = coordinator.client();
    for _ in 0..3 {
        client.resources().await.unwrap();
    }

    assert_eq!(seen.load(Ordering::SeqCst), 3);

    // Cancelling the coordinator's root token leaves connections alone.
    coordinator.scheduler().cancel_root();
    client.resources().await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 4);

    coordinator.server().shutdown().await;
}
