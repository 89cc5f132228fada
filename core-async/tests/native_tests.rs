//! Integration tests for the runtime facade.

use core_async::{sync, task, time};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    assert_eq!(handle.await.unwrap(), 42);
}

#[tokio::test(start_paused = true)]
async fn test_sleep_advances_paused_clock() {
    let start = time::Instant::now();
    time::sleep(time::Duration::from_millis(1500)).await;
    assert_eq!(start.elapsed(), time::Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_expires() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(100)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_timeout_success() {
    let result = time::timeout(time::Duration::from_millis(100), async { 42 }).await;
    assert_eq!(result.unwrap(), 42);
}

#[tokio::test]
async fn test_oneshot_fan_out() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut receivers = Vec::new();
    let mut senders = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = sync::oneshot::channel::<u32>();
        senders.push(tx);
        receivers.push(rx);
    }

    for tx in senders {
        tx.send(9).unwrap();
    }
    for rx in receivers {
        assert_eq!(rx.await.unwrap(), 9);
        counter.fetch_add(1, Ordering::SeqCst);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_watch_reports_latest_value() {
    let (tx, mut rx) = sync::watch::channel(true);
    tx.send(false).unwrap();
    rx.changed().await.unwrap();
    assert!(!*rx.borrow());
}

#[test]
fn test_now_millis_is_after_2020() {
    assert!(time::now_millis() > 1_577_836_800_000);
}

#[test]
fn test_block_on_outside_runtime() {
    assert!(core_async::runtime::Handle::try_current().is_err());
    let value = core_async::runtime::block_on(async { 5 }).unwrap();
    assert_eq!(value, 5);
}
