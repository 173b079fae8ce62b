//! Runtime integration tests over the in-memory store.
//!
//! Covers end-to-end delivery, retries within a lease, re-delivery after
//! lease expiry, unroutable records, fetch failures and shutdown.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use localq::{
    CommandQueue, CommandRuntime, CommandRuntimeBuilder, InMemoryCommandStore, ProcessingConfig,
    RetryPolicyConfig,
};
use localq_testkit::{FlakyStore, OrphanCommand, OtherCommand, RecordingHandler, TestCommand};

fn fast_config() -> ProcessingConfig {
    ProcessingConfig::default()
        .with_prefetch_count(8)
        .with_workers_count(4)
        .with_idle_timeout(Duration::from_millis(20))
        .with_summary_interval(Duration::from_secs(60))
        .with_shutdown_timeout(Duration::from_secs(2))
}

fn fast_retry(attempts: u32) -> RetryPolicyConfig {
    RetryPolicyConfig::default()
        .with_max_retry_count(attempts)
        .with_backoff_interval(Duration::from_millis(10))
}

async fn enqueue_batch(store: &InMemoryCommandStore, commands: Vec<TestCommand>) {
    let queue = CommandQueue::new(store.clone());
    let mut tx = store.begin();
    queue.enqueue(&mut tx, commands).await.expect("enqueue");
    tx.commit();
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn start(runtime: &CommandRuntime) {
    runtime.start().await.expect("start");
}

#[tokio::test]
async fn test_enqueued_commands_are_processed_and_deleted() {
    let store = InMemoryCommandStore::new();
    enqueue_batch(&store, TestCommand::batch("bulk", 25)).await;

    let handler = RecordingHandler::<TestCommand>::new();
    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(fast_config())
        .register::<TestCommand, _>(handler.clone())
        .build()
        .expect("build");
    start(&runtime).await;

    assert!(wait_until(Duration::from_secs(5), || store.is_empty()).await);
    runtime.shutdown().await.expect("shutdown");

    let seen: BTreeSet<u32> = handler.calls().into_iter().map(|c| c.seq).collect();
    assert_eq!(seen, (0..25).collect());
    handler.assert_call_count_eq(25);
}

#[tokio::test]
async fn test_commands_route_to_their_own_handler() {
    let store = InMemoryCommandStore::new();
    let queue = CommandQueue::new(store.clone());
    let mut tx = store.begin();
    queue
        .enqueue(&mut tx, TestCommand::batch("mixed", 3))
        .await
        .expect("enqueue");
    queue
        .enqueue(&mut tx, [OtherCommand { value: 1 }, OtherCommand { value: 2 }])
        .await
        .expect("enqueue");
    tx.commit();

    let tests = RecordingHandler::<TestCommand>::new();
    let others = RecordingHandler::<OtherCommand>::new();
    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(fast_config())
        .register::<TestCommand, _>(tests.clone())
        .register::<OtherCommand, _>(others.clone())
        .build()
        .expect("build");
    start(&runtime).await;

    assert!(wait_until(Duration::from_secs(5), || store.is_empty()).await);
    runtime.shutdown().await.expect("shutdown");

    tests.assert_call_count_eq(3);
    let values: BTreeSet<i64> = others.calls().into_iter().map(|c| c.value).collect();
    assert_eq!(values, BTreeSet::from([1, 2]));
}

#[tokio::test]
async fn test_transient_failure_is_retried_within_one_lease() {
    let store = InMemoryCommandStore::new();
    enqueue_batch(&store, vec![TestCommand::new("flaky", 0)]).await;

    let handler = RecordingHandler::<TestCommand>::failing(2);
    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(fast_config())
        .register_with_retry::<TestCommand, _>(handler.clone(), fast_retry(3))
        .build()
        .expect("build");
    start(&runtime).await;

    assert!(wait_until(Duration::from_secs(5), || store.is_empty()).await);
    runtime.shutdown().await.expect("shutdown");

    handler.assert_call_count_eq(3);
}

#[tokio::test]
async fn test_exhausted_retries_leave_record_leased() {
    let store = InMemoryCommandStore::new();
    enqueue_batch(&store, vec![TestCommand::new("poison", 0)]).await;
    let id = store.records()[0].id;

    let handler = RecordingHandler::<TestCommand>::always_failing();
    let config = fast_config()
        .with_invisibility_timeout(Duration::from_secs(30))
        .with_retry("testkit.TestCommand", fast_retry(3));
    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(config)
        .register::<TestCommand, _>(handler.clone())
        .build()
        .expect("build");
    start(&runtime).await;

    assert!(handler.wait_for_calls(3, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    runtime.shutdown().await.expect("shutdown");

    handler.assert_call_count_eq(3);
    let record = store.get(id).expect("record kept");
    assert_eq!(record.try_count, 1);
    assert!(record.locked_till_utc.is_some());
}

#[tokio::test]
async fn test_expired_lease_is_redelivered() {
    let store = InMemoryCommandStore::new();
    enqueue_batch(&store, vec![TestCommand::new("again", 0)]).await;
    let id = store.records()[0].id;

    let handler = RecordingHandler::<TestCommand>::always_failing();
    let config = fast_config()
        .with_invisibility_timeout(Duration::from_millis(150))
        .with_retry("testkit.TestCommand", fast_retry(1));
    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(config)
        .register::<TestCommand, _>(handler.clone())
        .build()
        .expect("build");
    start(&runtime).await;

    assert!(handler.wait_for_calls(2, Duration::from_secs(5)).await);
    runtime.shutdown().await.expect("shutdown");

    let record = store.get(id).expect("record kept");
    assert!(record.try_count >= 2);
}

#[tokio::test]
async fn test_unroutable_record_stays_leased() {
    let store = InMemoryCommandStore::new();
    let queue = CommandQueue::new(store.clone());
    let mut tx = store.begin();
    let id = queue
        .enqueue_one(&mut tx, OrphanCommand { note: "nobody".into() })
        .await
        .expect("enqueue");
    tx.commit();

    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(fast_config().with_invisibility_timeout(Duration::from_secs(30)))
        .register::<TestCommand, _>(RecordingHandler::<TestCommand>::new())
        .build()
        .expect("build");
    start(&runtime).await;

    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get(id).is_some_and(|r| r.try_count == 1)
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    runtime.shutdown().await.expect("shutdown");

    let record = store.get(id).expect("record kept");
    assert_eq!(record.try_count, 1);
    assert!(record.locked_till_utc.is_some());
}

#[tokio::test]
async fn test_fetch_failures_do_not_stop_processing() {
    let inner = InMemoryCommandStore::new();
    enqueue_batch(&inner, TestCommand::batch("after-outage", 5)).await;
    let store = FlakyStore::new(inner.clone());
    store.fail_next_prefetches(3);

    let handler = RecordingHandler::<TestCommand>::new();
    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(fast_config())
        .register::<TestCommand, _>(handler.clone())
        .build()
        .expect("build");
    start(&runtime).await;

    assert!(wait_until(Duration::from_secs(5), || inner.is_empty()).await);
    runtime.shutdown().await.expect("shutdown");

    assert!(store.prefetch_calls() >= 4);
    assert_eq!(store.deleted().len(), 5);
    handler.assert_call_count_eq(5);
}

#[tokio::test]
async fn test_failed_delete_reruns_handler() {
    let inner = InMemoryCommandStore::new();
    enqueue_batch(&inner, vec![TestCommand::new("sticky", 0)]).await;
    let store = FlakyStore::new(inner.clone());
    store.fail_next_deletes(1);

    let handler = RecordingHandler::<TestCommand>::new();
    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(fast_config())
        .register_with_retry::<TestCommand, _>(handler.clone(), fast_retry(3))
        .build()
        .expect("build");
    start(&runtime).await;

    assert!(wait_until(Duration::from_secs(5), || inner.is_empty()).await);
    runtime.shutdown().await.expect("shutdown");

    handler.assert_call_count_eq(2);
}

#[tokio::test]
async fn test_shutdown_interrupts_running_handler() {
    let store = InMemoryCommandStore::new();
    enqueue_batch(&store, vec![TestCommand::new("slow", 0)]).await;

    let handler = RecordingHandler::<TestCommand>::new().with_delay(Duration::from_secs(60));
    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(fast_config())
        .register::<TestCommand, _>(handler.clone())
        .build()
        .expect("build");
    start(&runtime).await;
    assert!(handler.wait_for_calls(1, Duration::from_secs(5)).await);

    let started = Instant::now();
    runtime.shutdown().await.expect("shutdown");

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(runtime.shutdown_token().is_cancelled());
    assert_eq!(store.len(), 1);
    handler.assert_call_count_eq(1);
}

#[tokio::test]
async fn test_runtime_cannot_start_twice() {
    let runtime = CommandRuntimeBuilder::new()
        .with_store(InMemoryCommandStore::new())
        .with_config(fast_config())
        .register::<TestCommand, _>(RecordingHandler::<TestCommand>::new())
        .build()
        .expect("build");

    start(&runtime).await;
    assert!(runtime.start().await.is_err());
    runtime.shutdown().await.expect("shutdown");
}
