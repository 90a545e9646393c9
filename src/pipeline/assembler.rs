use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::core::config::IndexConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::PipelineStats;
use crate::core::types::Batch;
use crate::pipeline::BatchSender;
use crate::source::DocumentSource;

/// Groups the document stream into fixed-size batches for the workers
pub struct BatchAssembler<S> {
    source: S,
    batch_size: usize,
    queue_full_wait: Duration,
    stats: Arc<PipelineStats>,
}

impl<S: DocumentSource> BatchAssembler<S> {
    pub fn new(source: S, config: &IndexConfig, stats: Arc<PipelineStats>) -> Self {
        BatchAssembler {
            source,
            batch_size: config.batch_size.max(1),
            queue_full_wait: config.queue_full_wait,
            stats,
        }
    }

    /// Read the source to the end, handing every full batch to `queue`.
    ///
    /// A short final batch is flushed at end of stream but not after a read
    /// failure. The queue is closed when this returns, whatever the reason.
    /// Returns the number of batches enqueued.
    pub async fn run(mut self, queue: BatchSender, cancel: CancellationToken) -> Result<u64> {
        let mut batch = Batch::new(0, self.batch_size);
        let mut enqueued = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(proc = "producer", "Context cancelled; shutting down");
                    return Ok(enqueued);
                }
                next = self.source.next_document() => next,
            };
            let doc = match next {
                Ok(Some(doc)) => doc,
                Ok(None) => break,
                Err(err) => {
                    error!(proc = "producer", batch = batch.id, "Read failed: {}", err);
                    return Err(err);
                }
            };

            batch.docs.push(doc);
            if batch.len() == self.batch_size {
                let next_id = batch.id + 1;
                if !enqueue(&queue, batch, self.queue_full_wait, &self.stats, &cancel).await? {
                    return Ok(enqueued);
                }
                enqueued += 1;
                batch = Batch::new(next_id, self.batch_size);
            }
        }

        if !batch.is_empty() && enqueue(&queue, batch, self.queue_full_wait, &self.stats, &cancel).await? {
            enqueued += 1;
        }
        info!(proc = "producer", "Input drained; {} batch(es) enqueued", enqueued);
        Ok(enqueued)
    }
}

/// Hand `batch` to the queue, polling every `wait` while it is full.
/// Returns `false` if cancelled first. Must not borrow the assembler: the
/// producer future has to stay `Send` for sources that are `Send` but not `Sync`.
async fn enqueue(
    queue: &BatchSender,
    mut batch: Batch,
    wait: Duration,
    stats: &PipelineStats,
    cancel: &CancellationToken,
) -> Result<bool> {
    loop {
        if cancel.is_cancelled() {
            warn!(proc = "producer", "Context cancelled; shutting down");
            return Ok(false);
        }
        debug!(proc = "producer", batch = batch.id, "Enqueuing batch");
        match queue.try_send(batch) {
            Ok(()) => {
                debug!(proc = "producer", "Batch enqueued");
                stats.record_enqueued();
                return Ok(true);
            }
            Err(TrySendError::Full(returned)) => {
                batch = returned;
                warn!(
                    proc = "producer",
                    batch = batch.id,
                    "Work queue is full; retrying in {:.2}s",
                    wait.as_secs_f64()
                );
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            Err(TrySendError::Closed(returned)) => {
                if cancel.is_cancelled() {
                    return Ok(false);
                }
                return Err(Error::new(
                    ErrorKind::Internal,
                    format!("work queue closed before batch {} was enqueued", returned.id),
                ));
            }
        }
    }
}
