//! Process-lifetime one-shot initializer: the first caller's loader runs
//! and publishes an `Arc<T>`; later callers observe the same instance
//! without re-running the loader.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::Result;

pub struct SharedInit<T> {
    cell: OnceCell<Arc<T>>,
}

impl<T> SharedInit<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub async fn get_or_try_init<F, Fut>(&self, loader: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cell
            .get_or_try_init(|| async { loader().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }
}

impl<T> Default for SharedInit<T> {
    fn default() -> Self {
        Self::new()
    }
}
