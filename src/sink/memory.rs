use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use parking_lot::Mutex;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, DocumentFailure};
use crate::sink::{BulkAction, BulkRequest, BulkResponse, BulkWriter};

/// In-process bulk destination with overwrite/upsert semantics.
///
/// Faults can be injected to exercise retry and cancellation paths.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Document>>,
    faults: Mutex<Faults>,
    received: Mutex<Vec<u64>>,
    calls: AtomicU64,
    auto_id: AtomicU64,
}

#[derive(Default)]
struct Faults {
    failing_calls: usize,
    rejected: HashMap<String, usize>,
    failing_batches: HashSet<u64>,
    latency: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `calls` bulk calls outright.
    pub fn fail_next_calls(&self, calls: usize) {
        self.faults.lock().failing_calls = calls;
    }

    /// Reject document `id` on its next `times` writes.
    pub fn reject_document(&self, id: &str, times: usize) {
        self.faults.lock().rejected.insert(id.to_string(), times);
    }

    /// Fail every call carrying batch `batch_id`.
    pub fn fail_batch(&self, batch_id: u64) {
        self.faults.lock().failing_batches.insert(batch_id);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = latency;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Batch ids in the order their calls arrived, retries included
    pub fn received_batches(&self) -> Vec<u64> {
        self.received.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.lock().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.docs.lock().get(id).cloned()
    }

    pub fn documents(&self) -> HashMap<String, Document> {
        self.docs.lock().clone()
    }

    fn apply(&self, request: &BulkRequest) -> BulkResponse {
        let mut faults = self.faults.lock();
        let mut docs = self.docs.lock();
        let mut failures = Vec::new();

        for action in &request.actions {
            if let Some(id) = action.id() {
                if let Some(remaining) = faults.rejected.get_mut(id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        failures.push(DocumentFailure {
                            id: Some(id.to_string()),
                            detail: "rejected by store".to_string(),
                        });
                        continue;
                    }
                }
            }

            match action {
                BulkAction::Index { id, doc } => {
                    let id = id.clone().unwrap_or_else(|| {
                        format!("auto-{}", self.auto_id.fetch_add(1, Ordering::SeqCst))
                    });
                    docs.insert(id, doc.clone());
                }
                BulkAction::Upsert { id, doc } => {
                    let stored = docs.entry(id.clone()).or_default();
                    for (k, v) in doc {
                        stored.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        BulkResponse { failures }
    }
}

impl BulkWriter for MemoryStore {
    async fn bulk(&self, request: &BulkRequest, timeout: Duration) -> Result<BulkResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(request.batch_id);

        let latency = self.faults.lock().latency;
        if !latency.is_zero() {
            if latency > timeout {
                tokio::time::sleep(timeout).await;
                return Err(Error::new(
                    ErrorKind::Timeout,
                    format!("bulk call timed out after {:?}", timeout),
                ));
            }
            tokio::time::sleep(latency).await;
        }

        {
            let mut faults = self.faults.lock();
            if faults.failing_batches.contains(&request.batch_id) {
                return Err(Error::new(
                    ErrorKind::Transport,
                    format!("store unavailable for batch {}", request.batch_id),
                ));
            }
            if faults.failing_calls > 0 {
                faults.failing_calls -= 1;
                return Err(Error::new(ErrorKind::Transport, "store unavailable".to_string()));
            }
        }

        Ok(self.apply(request))
    }
}
