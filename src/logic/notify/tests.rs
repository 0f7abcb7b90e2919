use super::*;
use crate::logic::schedule::ManualTicker;

/// Records every batch; optionally fails
#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<QueuedNotification>>>,
    fail: bool,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, batch: &[QueuedNotification]) -> Result<(), ControlPlaneError> {
        self.batches.lock().push(batch.to_vec());
        if self.fail {
            Err(ControlPlaneError::Network("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

fn note(i: usize) -> QueuedNotification {
    QueuedNotification {
        request_id: format!("req-{}", i),
        threat_type: "SQL Injection".into(),
    }
}

#[tokio::test]
async fn test_capacity_triggers_single_flush() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = NotificationBatcher::new(3, sink.clone());

    for i in 0..3 {
        batcher.enqueue(note(i)).await;
    }

    let batches = sink.batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
    assert_eq!(batches[0][0].request_id, "req-0");
    assert_eq!(batcher.pending(), 0);
}

#[tokio::test]
async fn test_below_capacity_waits_for_flush() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = NotificationBatcher::new(5, sink.clone());

    batcher.enqueue(note(0)).await;
    batcher.enqueue(note(1)).await;
    assert!(sink.batches.lock().is_empty());
    assert_eq!(batcher.pending(), 2);

    batcher.flush().await;
    assert_eq!(sink.batches.lock().len(), 1);
    assert_eq!(batcher.pending(), 0);

    // Empty flush sends nothing
    batcher.flush().await;
    assert_eq!(sink.batches.lock().len(), 1);
    assert_eq!(batcher.status().sent, 2);
}

#[tokio::test]
async fn test_failed_send_drops_batch() {
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..Default::default()
    });
    let batcher = NotificationBatcher::new(2, sink.clone());

    batcher.enqueue(note(0)).await;
    batcher.enqueue(note(1)).await;
    assert_eq!(batcher.pending(), 0);

    // Not retried
    batcher.flush().await;
    assert_eq!(sink.batches.lock().len(), 1);

    let status = batcher.status();
    assert_eq!(status.dropped, 2);
    assert_eq!(status.sent, 0);
}

#[tokio::test]
async fn test_concurrent_enqueues_are_never_lost() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = Arc::new(NotificationBatcher::new(4, sink.clone()));

    let mut handles = Vec::new();
    for i in 0..40 {
        let b = batcher.clone();
        handles.push(tokio::spawn(async move { b.enqueue(note(i)).await }));
    }
    for h in handles {
        h.await.unwrap();
    }
    batcher.flush().await;

    let mut ids: Vec<String> = sink
        .batches
        .lock()
        .iter()
        .flatten()
        .map(|n| n.request_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 40);
    assert_eq!(batcher.status().sent, 40);
}

#[tokio::test]
async fn test_flush_loop_drains_stragglers() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = Arc::new(NotificationBatcher::new(10, sink.clone()));
    let (tick, ticker) = ManualTicker::new();

    batcher.enqueue(note(0)).await;
    let task = tokio::spawn(batcher.clone().run_flush_loop(ticker, CancellationToken::new()));

    tick.send(()).unwrap();
    drop(tick);
    task.await.unwrap();

    assert_eq!(sink.batches.lock().len(), 1);
    assert_eq!(batcher.pending(), 0);
}
