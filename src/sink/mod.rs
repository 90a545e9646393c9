use std::future::Future;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{document_id, strip_reserved, Batch, Document, DocumentFailure, WriteMode};

pub mod elastic;
pub mod memory;

pub use elastic::ElasticClient;
pub use memory::MemoryStore;

/// One write inside a bulk request
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    /// Insert or overwrite; the store assigns an id when none is given
    Index { id: Option<String>, doc: Document },
    /// Merge `doc` into the stored document, creating it if absent
    Upsert { id: String, doc: Document },
}

impl BulkAction {
    pub fn id(&self) -> Option<&str> {
        match self {
            BulkAction::Index { id, .. } => id.as_deref(),
            BulkAction::Upsert { id, .. } => Some(id),
        }
    }
}

/// A batch translated into store writes
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRequest {
    pub batch_id: u64,
    pub actions: Vec<BulkAction>,
}

impl BulkRequest {
    /// Build the write actions for `batch`.
    ///
    /// Reserved-prefix fields are stripped from every document. In upsert
    /// mode each document must carry `id_field`.
    pub fn from_batch(batch: &Batch, mode: WriteMode, id_field: &str) -> Result<Self> {
        let mut actions = Vec::with_capacity(batch.len());
        for doc in &batch.docs {
            let id = document_id(doc, id_field);
            let body = strip_reserved(doc);
            let action = match mode {
                WriteMode::Index => BulkAction::Index { id, doc: body },
                WriteMode::Upsert => {
                    let id = id.ok_or_else(|| {
                        Error::new(
                            ErrorKind::MissingIdentifier,
                            format!(
                                "Missing ID field [{}] for partial upsert in batch {}: {}",
                                id_field,
                                batch.id,
                                serde_json::Value::Object(doc.clone())
                            ),
                        )
                    })?;
                    BulkAction::Upsert { id, doc: body }
                }
            };
            actions.push(action);
        }
        Ok(BulkRequest {
            batch_id: batch.id,
            actions,
        })
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Outcome of a bulk call that reached the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub failures: Vec<DocumentFailure>,
}

impl BulkResponse {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn rejected documents into a retryable error.
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(Error::partial_write(self.failures))
        }
    }
}

/// Destination store accepting bulk writes
pub trait BulkWriter: Send + Sync {
    /// Send one bulk request; the call must not outlive `timeout`.
    ///
    /// `Err` means the call failed as a whole. Per-document rejections come
    /// back in the response.
    fn bulk(
        &self,
        request: &BulkRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<BulkResponse>> + Send;
}
