//! Bounded worker pool for backends that only delete one object per call.

use std::{future::Future, sync::Arc};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::{BlobError, BlobResult};

pub const DEFAULT_DELETE_WORKERS: usize = 150;

#[derive(Debug, Default)]
pub struct BulkDeleteReport {
    pub deleted: usize,
    pub failures: Vec<(String, BlobError)>,
}

impl BulkDeleteReport {
    /// Collapses the report into the first non-`NotFound` failure.
    ///
    /// Objects that vanished concurrently are treated as deleted.
    pub fn into_result(self) -> BlobResult<()> {
        let failed = self.failures.len();
        match self
            .failures
            .into_iter()
            .find(|(_, err)| !err.is_not_found())
        {
            Some((name, err)) => {
                warn!(name = %name, failed, "bulk delete finished with failures");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// Calls `delete_fn` once per name using `workers` concurrent tasks.
///
/// Returns only after every name has been accounted for. An empty list never
/// invokes `delete_fn`.
pub async fn delete_all<F, Fut>(
    names: Vec<String>,
    workers: usize,
    delete_fn: F,
) -> BulkDeleteReport
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BlobResult<()>> + Send + 'static,
{
    let mut report = BulkDeleteReport::default();
    if names.is_empty() {
        return report;
    }

    let total = names.len();
    let workers = workers.clamp(1, total);
    let (name_tx, name_rx) = mpsc::channel::<String>(workers);
    let (result_tx, mut result_rx) = mpsc::channel::<(String, BlobResult<()>)>(workers);
    let name_rx = Arc::new(Mutex::new(name_rx));
    let delete_fn = Arc::new(delete_fn);

    for _ in 0..workers {
        let name_rx = name_rx.clone();
        let result_tx = result_tx.clone();
        let delete_fn = delete_fn.clone();
        tokio::spawn(async move {
            loop {
                let next = name_rx.lock().await.recv().await;
                let Some(name) = next else {
                    break;
                };
                let result = delete_fn(name.clone()).await;
                if result_tx.send((name, result)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    let feeder = tokio::spawn(async move {
        for name in names {
            if name_tx.send(name).await.is_err() {
                break;
            }
        }
    });

    let mut accounted = 0;
    while accounted < total {
        let Some((name, result)) = result_rx.recv().await else {
            break;
        };
        accounted += 1;
        match result {
            Ok(()) => report.deleted += 1,
            Err(err) => report.failures.push((name, err)),
        }
    }
    if let Err(err) = feeder.await {
        warn!(error = %err, "bulk delete feeder task failed");
    }

    debug!(
        total,
        deleted = report.deleted,
        failed = report.failures.len(),
        "bulk delete complete"
    );
    report
}
