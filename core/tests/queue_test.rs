use std::sync::Arc;

use relay_core::{RelayError, RequestQueue};

#[tokio::test]
async fn second_admission_is_busy() {
    let queue = RequestQueue::new();
    let first = queue.admit("chan", vec![]).expect("first admitted");
    let err = queue.admit("chan", vec![]).expect_err("second rejected");
    assert!(matches!(err, RelayError::Busy(ref c) if c == "chan"));

    // other channels are independent
    assert!(queue.admit("other", vec![]).is_ok());
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.status("chan").map(|s| s.correlation_id), Some(first.correlation_id));
}

#[tokio::test]
async fn clear_is_idempotent_and_signals_cancellation() {
    let queue = RequestQueue::new();
    assert!(!queue.clear("chan"));

    let mut batch = queue.admit("chan", vec![]).expect("admitted");
    assert!(!batch.cancellation.is_cancelled());
    assert!(queue.clear("chan"));
    assert!(!queue.clear("chan"));

    tokio::time::timeout(
        std::time::Duration::from_secs(1),
        batch.cancellation.cancelled(),
    )
    .await
    .expect("cancellation observed");
    assert!(queue.admit("chan", vec![]).is_ok());
}

#[tokio::test]
async fn finish_only_removes_own_batch() {
    let queue = RequestQueue::new();
    let old = queue.admit("chan", vec![]).expect("admitted");
    queue.clear("chan");
    let current = queue.admit("chan", vec![]).expect("re-admitted");

    assert!(!queue.finish("chan", &format!("{}-stale", old.correlation_id)));
    assert!(queue.is_pending("chan"));
    queue.advance("chan", &current.correlation_id, 3);
    assert_eq!(queue.status("chan").map(|s| s.cursor), Some(3));
    assert!(queue.finish("chan", &current.correlation_id));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn readmitted_batches_get_fresh_ids() {
    let queue = RequestQueue::new();
    let mut last = 0i64;
    for _ in 0..50 {
        let batch = queue.admit("chan", vec![]).expect("admitted");
        let id: i64 = batch.correlation_id.parse().expect("numeric id");
        assert!(id > last);
        last = id;
        queue.clear("chan");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admission_is_exclusive() {
    let queue = Arc::new(RequestQueue::new());
    let mut tasks = Vec::new();
    for _ in 0..32 {
        let q = Arc::clone(&queue);
        tasks.push(tokio::spawn(async move { q.admit("chan", vec![]).is_ok() }));
    }
    let mut accepted = 0;
    for t in tasks {
        if t.await.expect("task ran") {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}
