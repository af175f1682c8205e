use std::future::Future;

use futures_util::{
    FutureExt,
    future::{BoxFuture, Shared},
};

/// A computation that runs at most once and broadcasts its outcome.
///
/// Every [`get`](Self::get) call, whether issued before, during or after the
/// computation, observes the same output. The computation is started eagerly
/// on the tokio runtime, so it makes progress even before the first caller
/// shows up.
pub struct SingleFlight<T> {
    shared: Shared<BoxFuture<'static, T>>,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Starts `fut` immediately. Must be called inside a tokio runtime.
    pub fn spawn(fut: impl Future<Output = T> + Send + 'static) -> Self {
        let shared = fut.boxed().shared();
        tokio::spawn(shared.clone());
        Self { shared }
    }

    pub async fn get(&self) -> T {
        self.shared.clone().await
    }

    /// The outcome, if already settled.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.shared.peek().cloned()
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight").finish()
    }
}
