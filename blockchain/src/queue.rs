use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

/// Unit of work for a [`BlockQueue`].
#[async_trait::async_trait]
pub trait QueueJob: Send + 'static {
    async fn handle(self) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub enum QueueEvent {
    /// The last queued job finished and nothing is waiting.
    Drain,
    /// A job returned an error. The queue moves on to the next one.
    JobError(anyhow::Error),
}

/// FIFO of jobs drained by a single worker task.
///
/// At most one job runs at any time. Pausing keeps queued jobs but stops
/// the worker from taking new ones; stopping also discards them and ends
/// the worker until [`BlockQueue::start`] is called again.
pub struct BlockQueue<J: QueueJob> {
    inner: Arc<QueueInner<J>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct QueueInner<J> {
    jobs: Mutex<VecDeque<J>>,
    notify: Notify,
    /// Signalled whenever a job finishes.
    finished: Notify,
    paused: AtomicBool,
    stopped: AtomicBool,
    running: AtomicBool,
    /// Bumped on every start; a worker from an older generation exits.
    generation: AtomicU64,
    events: mpsc::UnboundedSender<QueueEvent>,
}

impl<J: QueueJob> BlockQueue<J> {
    pub fn new(events: mpsc::UnboundedSender<QueueEvent>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                finished: Notify::new(),
                paused: AtomicBool::new(false),
                stopped: AtomicBool::new(true),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                events,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker if it is not running. Needs a Tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if !self.is_stopped() && worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.stopped.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);

        let inner = self.inner.clone();
        let previous = worker.take();
        *worker = Some(tokio::spawn(async move {
            // A stopped worker still finishes the job it is running.
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            run(inner, generation).await;
        }));
    }

    pub fn push(&self, job: J) {
        if self.is_stopped() {
            debug!("Queue stopped, dropping job");
            return;
        }
        self.inner.jobs.lock().push_back(job);
        self.inner.notify.notify_one();
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    /// Drop every waiting job. A running job is not interrupted.
    pub fn clear(&self) {
        self.inner.jobs.lock().clear();
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.clear();
        self.inner.notify.notify_one();
    }

    /// Jobs waiting to run.
    pub fn size(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    /// Nothing waiting and nothing running.
    pub fn is_idle(&self) -> bool {
        self.size() == 0 && !self.inner.running.load(Ordering::SeqCst)
    }

    /// Wait for the running job, if any, to finish. Waiting jobs are not
    /// awaited; pause or clear the queue first to keep them from starting.
    pub async fn wait_idle(&self) {
        loop {
            let finished = self.inner.finished.notified();
            if !self.inner.running.load(Ordering::SeqCst) {
                return;
            }
            finished.await;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

impl<J: QueueJob> Drop for BlockQueue<J> {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

async fn run<J: QueueJob>(inner: Arc<QueueInner<J>>, generation: u64) {
    loop {
        if inner.stopped.load(Ordering::SeqCst) || inner.generation.load(Ordering::SeqCst) != generation {
            debug!("Queue worker stopped");
            return;
        }

        let job = if inner.paused.load(Ordering::SeqCst) {
            None
        } else {
            let mut jobs = inner.jobs.lock();
            let job = jobs.pop_front();
            if job.is_some() {
                inner.running.store(true, Ordering::SeqCst);
            }
            job
        };

        let Some(job) = job else {
            inner.notify.notified().await;
            continue;
        };

        let result = job.handle().await;
        inner.running.store(false, Ordering::SeqCst);
        inner.finished.notify_waiters();

        if let Err(err) = result {
            let _ = inner.events.send(QueueEvent::JobError(err));
        }
        if inner.jobs.lock().is_empty() && !inner.stopped.load(Ordering::SeqCst) {
            let _ = inner.events.send(QueueEvent::Drain);
        }
    }
}
