//! Query worker pool.
//!
//! Query jobs run on a dedicated multi-threaded tokio runtime so that callers
//! blocking on a [`BlockingQuery`](super::BlockingQuery) can never starve the
//! threads that would complete their query. Each query maker owns a
//! [`JobLane`]: a lazily spawned task draining that maker's jobs one at a
//! time, in submission order.

use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::cell::Cell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static THREAD_COUNTER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static QUERY_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread belongs to a [`QueryPool`].
pub fn is_query_worker_thread() -> bool {
    QUERY_WORKER.with(Cell::get)
}

/// Fixed-size pool executing query jobs.
pub struct QueryPool {
    runtime: Option<Runtime>,
    handle: Handle,
    threads: usize,
}

impl QueryPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name_fn(|| {
                let n = THREAD_COUNTER.fetch_add(1, Ordering::Relaxed);
                format!("collection-query-{n}")
            })
            .on_thread_start(|| QUERY_WORKER.with(|w| w.set(true)))
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        info!(threads, "Query worker pool started");

        Ok(Self {
            runtime: Some(runtime),
            handle,
            threads,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!("Shutting down query worker pool");
            runtime.shutdown_background();
        }
    }
}

type Job = BoxFuture<'static, ()>;

/// Serial job queue of one query maker.
pub(crate) struct JobLane {
    pool: Arc<QueryPool>,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    pending: Arc<AtomicUsize>,
    cancel: Mutex<CancellationToken>,
}

impl JobLane {
    pub(crate) fn new(pool: Arc<QueryPool>) -> Self {
        Self {
            pool,
            sender: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Queue a job. `job` receives a token that fires on
    /// [`abort`](Self::abort).
    pub(crate) fn submit<F, Fut>(&self, job: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.lock().child_token();
        self.pending.fetch_add(1, Ordering::SeqCst);

        let pending = self.pending.clone();
        let work = job(token);
        let job: Job = async move {
            if AssertUnwindSafe(work).catch_unwind().await.is_err() {
                warn!("Query job panicked");
            }
            pending.fetch_sub(1, Ordering::SeqCst);
        }
        .boxed();

        let mut sender = self.sender.lock();
        let tx = sender.get_or_insert_with(|| self.spawn_lane());
        if let Err(mpsc::error::SendError(job)) = tx.send(job) {
            let tx = self.spawn_lane();
            if tx.send(job).is_err() {
                warn!("Query worker pool is shut down, job dropped");
                self.pending.fetch_sub(1, Ordering::SeqCst);
            }
            *sender = Some(tx);
        }
    }

    fn spawn_lane(&self) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        self.pool.spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        tx
    }

    /// Cancel every queued and running job. Later submissions are not
    /// affected.
    pub(crate) fn abort(&self) {
        let mut cancel = self.cancel.lock();
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Stall the lane until the returned sender fires or drops.
    #[cfg(test)]
    pub(crate) fn hold(&self) -> tokio::sync::oneshot::Sender<()> {
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        self.submit(move |_| async move {
            gate.await.ok();
        });
        release
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_worker_threads_are_flagged() {
        let pool = QueryPool::new(2).unwrap();
        assert!(!is_query_worker_thread());

        let (tx, rx) = std::sync::mpsc::channel();
        pool.spawn(async move {
            let name = std::thread::current().name().map(str::to_string);
            tx.send((is_query_worker_thread(), name)).ok();
        });
        let (flagged, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(flagged);
        assert!(name.unwrap().starts_with("collection-query-"));
    }

    #[tokio::test]
    async fn test_lane_runs_jobs_in_order() {
        let pool = Arc::new(QueryPool::new(4).unwrap());
        let lane = JobLane::new(pool);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        for i in 0..20 {
            let seen = seen.clone();
            lane.submit(move |_| async move {
                tokio::time::sleep(Duration::from_millis((20 - i) % 3)).await;
                seen.lock().push(i);
            });
        }
        lane.submit(move |_| async move {
            done_tx.send(()).ok();
        });

        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_abort_cancels_pending_jobs_only() {
        let pool = Arc::new(QueryPool::new(1).unwrap());
        let lane = JobLane::new(pool);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx1 = tx.clone();
        lane.submit(move |token| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx1.send(("first", token.is_cancelled())).ok();
        });
        lane.abort();
        let tx2 = tx.clone();
        lane.submit(move |token| async move {
            tx2.send(("second", token.is_cancelled())).ok();
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, ("first", true));
        assert_eq!(second, ("second", false));
    }

    #[tokio::test]
    async fn test_is_running_until_jobs_drain() {
        let pool = Arc::new(QueryPool::new(1).unwrap());
        let lane = JobLane::new(pool);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        lane.submit(move |_| async move {
            release_rx.await.ok();
        });
        assert!(lane.is_running());

        release_tx.send(()).unwrap();
        for _ in 0..100 {
            if !lane.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!lane.is_running());
    }
}
