//! Experiment aggregation and mutation.
//!
//! Every operation runs as an authenticated [`User`](crate::types::User); the HTTP layer hands
//! over the user resolved from the request's token.

mod access;
mod aggregate;
mod mutate;
mod validation;


pub use aggregate::ExperimentFilter;
pub use mutate::{FileUpload, NewExperiment};
pub use validation::normalize_email;

use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::ObjectStore;
use crate::store::Store;

/// Computes each user's visible experiment set and applies mutations to it.
///
/// Holds no per-user state: every read recomputes from the store, so a change
/// of signed-in user needs no invalidation.
#[derive(Clone)]
pub struct ExperimentService {
    store: Arc<dyn Store>,
    objects: Arc<dyn ObjectStore>,
    max_upload_bytes: usize,
}

impl ExperimentService {
    pub fn new(
        store: Arc<dyn Store>,
        objects: Arc<dyn ObjectStore>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            objects,
            max_upload_bytes,
        }
    }

    #[must_use]
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }
}

/// Runs a mutation on its own task and waits for it.
///
/// Dropping the returned future (for example when the client disconnects)
/// does not stop the mutation between its writes.
pub async fn run_detached<T, F>(mutation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(mutation).await?
}
