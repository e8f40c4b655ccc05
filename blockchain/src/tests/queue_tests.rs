use crate::queue::{BlockQueue, QueueEvent, QueueJob};
use anyhow::bail;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<u32>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct TestJob {
    id: u32,
    fail: bool,
    delay: Duration,
    recorder: Arc<Recorder>,
}

impl TestJob {
    fn ok(id: u32, recorder: &Arc<Recorder>) -> Self {
        Self {
            id,
            fail: false,
            delay: Duration::ZERO,
            recorder: recorder.clone(),
        }
    }

    fn failing(id: u32, recorder: &Arc<Recorder>) -> Self {
        Self {
            fail: true,
            ..Self::ok(id, recorder)
        }
    }

    fn slow(id: u32, recorder: &Arc<Recorder>) -> Self {
        Self {
            delay: Duration::from_millis(20),
            ..Self::ok(id, recorder)
        }
    }
}

#[async_trait::async_trait]
impl QueueJob for TestJob {
    async fn handle(self) -> anyhow::Result<()> {
        let active = self.recorder.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.recorder.log.lock().push(self.id);
        self.recorder.active.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            bail!("job {} failed", self.id);
        }
        Ok(())
    }
}

fn started_queue() -> (BlockQueue<TestJob>, mpsc::UnboundedReceiver<QueueEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queue = BlockQueue::new(tx);
    queue.start();
    (queue, rx)
}

/// Collect events up to and including the next drain.
async fn until_drain(events: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            let drained = matches!(event, QueueEvent::Drain);
            seen.push(event);
            if drained {
                return;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "queue never drained");
    seen
}

#[tokio::test]
async fn test_jobs_run_in_order_then_drain() {
    let recorder = Arc::new(Recorder::default());
    let (queue, mut events) = started_queue();

    for id in 1..=5 {
        queue.push(TestJob::ok(id, &recorder));
    }
    let seen = until_drain(&mut events).await;

    assert_eq!(seen.len(), 1);
    assert_eq!(*recorder.log.lock(), vec![1, 2, 3, 4, 5]);
    assert!(queue.is_idle());
}

#[tokio::test]
async fn test_job_error_does_not_stop_the_queue() {
    let recorder = Arc::new(Recorder::default());
    let (queue, mut events) = started_queue();

    queue.push(TestJob::ok(1, &recorder));
    queue.push(TestJob::failing(2, &recorder));
    queue.push(TestJob::ok(3, &recorder));
    let seen = until_drain(&mut events).await;

    let errors: Vec<String> = seen
        .iter()
        .filter_map(|event| match event {
            QueueEvent::JobError(err) => Some(err.to_string()),
            QueueEvent::Drain => None,
        })
        .collect();
    assert_eq!(errors, vec!["job 2 failed".to_string()]);
    assert_eq!(*recorder.log.lock(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_failing_last_job_still_drains() {
    let recorder = Arc::new(Recorder::default());
    let (queue, mut events) = started_queue();

    queue.push(TestJob::failing(1, &recorder));
    let seen = until_drain(&mut events).await;

    assert!(matches!(seen.as_slice(), [QueueEvent::JobError(_), QueueEvent::Drain]));
}

#[tokio::test]
async fn test_one_job_at_a_time() {
    let recorder = Arc::new(Recorder::default());
    let (queue, mut events) = started_queue();

    for id in 1..=4 {
        queue.push(TestJob::slow(id, &recorder));
    }
    until_drain(&mut events).await;

    assert_eq!(recorder.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(*recorder.log.lock(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_paused_queue_holds_jobs_until_resumed() {
    let recorder = Arc::new(Recorder::default());
    let (queue, mut events) = started_queue();

    queue.pause();
    queue.push(TestJob::ok(1, &recorder));
    queue.push(TestJob::ok(2, &recorder));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(recorder.log.lock().is_empty());
    assert_eq!(queue.size(), 2);
    assert!(queue.is_paused());

    queue.resume();
    until_drain(&mut events).await;
    assert_eq!(*recorder.log.lock(), vec![1, 2]);
}

#[tokio::test]
async fn test_clear_drops_waiting_jobs() {
    let recorder = Arc::new(Recorder::default());
    let (queue, _events) = started_queue();

    queue.pause();
    for id in 1..=3 {
        queue.push(TestJob::ok(id, &recorder));
    }
    queue.clear();

    assert_eq!(queue.size(), 0);
    assert!(queue.is_idle());
    queue.resume();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recorder.log.lock().is_empty());
}

#[tokio::test]
async fn test_new_queue_is_stopped_and_drops_jobs() {
    let recorder = Arc::new(Recorder::default());
    let (tx, mut events) = mpsc::unbounded_channel();
    let queue = BlockQueue::new(tx);

    assert!(queue.is_stopped());
    queue.push(TestJob::ok(1, &recorder));
    assert_eq!(queue.size(), 0);

    queue.start();
    queue.push(TestJob::ok(2, &recorder));
    until_drain(&mut events).await;
    assert_eq!(*recorder.log.lock(), vec![2]);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let recorder = Arc::new(Recorder::default());
    let (queue, mut events) = started_queue();

    queue.pause();
    queue.push(TestJob::ok(1, &recorder));
    queue.stop();
    assert!(queue.is_stopped());
    assert_eq!(queue.size(), 0);

    queue.start();
    assert!(!queue.is_stopped());
    assert!(!queue.is_paused());
    queue.push(TestJob::ok(2, &recorder));
    until_drain(&mut events).await;
    assert_eq!(*recorder.log.lock(), vec![2]);
}

#[tokio::test]
async fn test_wait_idle_returns_at_once_when_nothing_runs() {
    let (queue, _events) = started_queue();

    let waited = tokio::time::timeout(Duration::from_millis(100), queue.wait_idle()).await;
    assert!(waited.is_ok());
}

#[tokio::test]
async fn test_wait_idle_outlasts_the_running_job() {
    let recorder = Arc::new(Recorder::default());
    let (queue, _events) = started_queue();

    queue.push(TestJob::slow(1, &recorder));
    queue.push(TestJob::slow(2, &recorder));
    while recorder.active.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    queue.pause();
    queue.clear();

    tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
        .await
        .expect("running job never finished");
    assert_eq!(*recorder.log.lock(), vec![1]);
    assert_eq!(recorder.active.load(Ordering::SeqCst), 0);
    assert!(queue.is_idle());
}
