use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// A `JoinSet` whose tasks wait for one of `workers` permits before running.
pub(crate) struct WorkerPool<T> {
    tasks: JoinSet<T>,
    permits: Arc<Semaphore>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub(crate) fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            task.await
        });
    }

    pub(crate) async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
        self.tasks.join_next().await
    }
}
