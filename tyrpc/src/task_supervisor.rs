use std::future::Future;

use tokio_util::{
    sync::{CancellationToken, DropGuard, WaitForCancellationFuture},
    task::TaskTracker,
};

/// Owns the server's background tasks: the accept loop and every connection.
///
/// Tasks spawned here are dropped at their next await point once
/// [`stop`](Self::stop) is called, so cleanup belongs in `Drop` guards.
///
/// ```rust,no_run
/// # use tyrpc::TaskSupervisor;
/// # #[tokio::main]
/// # async fn main() {
/// let supervisor = TaskSupervisor::default();
/// supervisor.spawn(async {
///     std::future::pending::<()>().await;
/// });
/// supervisor.stop();
/// supervisor.all_stopped().await;
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    stop: CancellationToken,
}

impl TaskSupervisor {
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let stop = self.stop.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                () = stop.cancelled() => {}
                () = fut => {}
            }
        });
    }

    /// Cancels every task and refuses to wait for new ones.
    pub fn stop(&self) {
        self.stop.cancel();
        self.tracker.close();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// A guard that calls `stop()` when dropped.
    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        self.stop.clone().drop_guard()
    }

    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }

    /// Resolves after `stop()` once every spawned task has finished.
    pub async fn all_stopped(&self) {
        self.tracker.wait().await;
    }
}
