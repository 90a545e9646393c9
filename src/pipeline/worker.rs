use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use crate::core::config::IndexConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::PipelineStats;
use crate::core::types::Batch;
use crate::pipeline::BatchReceiver;
use crate::sink::{BulkRequest, BulkResponse, BulkWriter};
use crate::throttle::adaptive::AdaptiveThrottle;

/// Fixed set of workers draining the batch queue into a [`BulkWriter`]
pub struct WorkerPool<W> {
    writer: Arc<W>,
    throttle: Arc<AdaptiveThrottle>,
    config: Arc<IndexConfig>,
    stats: Arc<PipelineStats>,
}

/// Outcome of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Written,
    Cancelled,
}

impl<W: BulkWriter + 'static> WorkerPool<W> {
    pub fn new(
        writer: Arc<W>,
        throttle: Arc<AdaptiveThrottle>,
        config: Arc<IndexConfig>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        WorkerPool { writer, throttle, config, stats }
    }

    pub fn size(&self) -> usize {
        self.config.effective_workers()
    }

    /// Spawn every worker into `tasks`. A worker that fails cancels `cancel`
    /// before returning its error.
    pub fn spawn(&self, tasks: &mut JoinSet<Result<()>>, queue: &BatchReceiver, cancel: &CancellationToken) {
        for index in 0..self.size() {
            let worker = Worker {
                index,
                writer: self.writer.clone(),
                throttle: self.throttle.clone(),
                config: self.config.clone(),
                stats: self.stats.clone(),
            };
            let queue = queue.clone();
            let cancel = cancel.clone();
            tasks.spawn(
                async move {
                    info!("worker-{} started", index);
                    let result = worker.run(queue, &cancel).await;
                    if let Err(err) = &result {
                        error!("worker-{} failed: {}", index, err);
                        cancel.cancel();
                    }
                    result
                }
                .instrument(info_span!("worker", id = index)),
            );
        }
    }
}

struct Worker<W> {
    index: usize,
    writer: Arc<W>,
    throttle: Arc<AdaptiveThrottle>,
    config: Arc<IndexConfig>,
    stats: Arc<PipelineStats>,
}

impl<W: BulkWriter> Worker<W> {
    async fn run(&self, queue: BatchReceiver, cancel: &CancellationToken) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                batch = async { queue.lock().await.recv().await } => Some(batch),
            };
            let batch = match next {
                None => {
                    warn!("Context cancelled; shutting down");
                    return Ok(());
                }
                // queue closed and drained
                Some(None) => return Ok(()),
                Some(Some(batch)) => batch,
            };
            if cancel.is_cancelled() {
                warn!(batch = batch.id, "Context cancelled; dropping batch");
                return Ok(());
            }

            if self.process(&batch, cancel).await? == Dispatch::Cancelled {
                warn!(batch = batch.id, "Context cancelled; shutting down");
                return Ok(());
            }
        }
    }

    /// Write one batch, retrying the whole batch on retryable failures.
    async fn process(&self, batch: &Batch, cancel: &CancellationToken) -> Result<Dispatch> {
        let request = BulkRequest::from_batch(batch, self.config.write_mode, &self.config.id_field)?;
        let max_retries = self.config.max_retries;
        let mut retry = 0;

        loop {
            match self.throttle.gate(cancel).await {
                Some(delay) => self.stats.record_throttle(delay),
                None => return Ok(Dispatch::Cancelled),
            }

            let start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Dispatch::Cancelled),
                outcome = self.dispatch(&request) => outcome,
            };
            let elapsed = start.elapsed();
            self.throttle.collect(elapsed);

            let err = match outcome {
                Ok(()) => {
                    info!(batch = batch.id, "Batch completed in {:.2}s", elapsed.as_secs_f64());
                    self.stats.record_written(batch.len());
                    return Ok(Dispatch::Written);
                }
                Err(err) => err,
            };

            for failure in &err.failures {
                error!(
                    batch = batch.id,
                    doc_id = failure.id.as_deref().unwrap_or("<none>"),
                    "Document failed to index: {}",
                    failure.detail
                );
            }
            if !err.is_retryable() {
                return Err(err);
            }
            if retry >= max_retries {
                return Err(err.exhausted(batch.id, retry + 1));
            }
            retry += 1;
            self.stats.record_retry();
            warn!(batch = batch.id, "Batch [{}] failed: {}", batch.id, err);
            warn!(batch = batch.id, "Batch [{}] retrying ({} of {})", batch.id, retry, max_retries);
        }
    }

    /// One bulk call bounded by the request timeout.
    async fn dispatch(&self, request: &BulkRequest) -> Result<()> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, self.writer.bulk(request, timeout)).await {
            Ok(response) => response.and_then(BulkResponse::into_result),
            Err(_) => Err(Error::new(
                ErrorKind::Timeout,
                format!(
                    "worker-{}: bulk call for batch {} timed out after {:?}",
                    self.index, request.batch_id, timeout
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use serde_json::json;
    use crate::core::config::ThrottleConfig;
    use crate::core::types::{Document, WriteMode};
    use crate::pipeline::batch_queue;
    use crate::sink::MemoryStore;

    fn batch(id: u64, ids: &[&str]) -> Batch {
        Batch {
            id,
            docs: ids
                .iter()
                .map(|i| json!({"_id": i, "v": id}).as_object().cloned().unwrap())
                .collect::<Vec<Document>>(),
        }
    }

    fn worker(store: Arc<MemoryStore>, config: IndexConfig) -> Worker<MemoryStore> {
        let throttle = AdaptiveThrottle::new(config.throttle.clone());
        Worker {
            index: 0,
            writer: store,
            throttle: Arc::new(throttle),
            config: Arc::new(config),
            stats: Arc::new(PipelineStats::new()),
        }
    }

    fn config(max_retries: usize) -> IndexConfig {
        IndexConfig {
            workers: 1,
            max_retries,
            request_timeout: Duration::from_secs(5),
            throttle: ThrottleConfig::new(Duration::from_secs(5), 10, 1.0),
            ..IndexConfig::default()
        }
    }

    #[tokio::test]
    async fn writes_batch() {
        let store = Arc::new(MemoryStore::new());
        let w = worker(store.clone(), config(3));
        let out = w.process(&batch(0, &["a", "b"]), &CancellationToken::new()).await.unwrap();
        assert_eq!(out, Dispatch::Written);
        assert_eq!(store.len(), 2);
        assert!(!store.get("a").unwrap().contains_key("_id"));
        assert_eq!(w.throttle.samples().len(), 1);
        assert_eq!(w.stats.snapshot().documents_written, 2);
    }

    #[tokio::test]
    async fn retries_whole_batch_then_succeeds() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_calls(1);
        store.reject_document("b", 1);
        let w = worker(store.clone(), config(3));
        let out = w.process(&batch(4, &["a", "b"]), &CancellationToken::new()).await.unwrap();
        assert_eq!(out, Dispatch::Written);
        assert_eq!(store.received_batches(), vec![4, 4, 4]);
        assert_eq!(store.len(), 2);
        // every attempt feeds the throttle, failures included
        assert_eq!(w.throttle.samples().len(), 3);
        assert_eq!(w.stats.snapshot().retries, 2);
    }

    #[tokio::test]
    async fn exhausts_retry_budget() {
        let store = Arc::new(MemoryStore::new());
        store.fail_batch(2);
        let w = worker(store.clone(), config(2));
        let err = w.process(&batch(2, &["a"]), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RetryBudgetExhausted);
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn missing_identifier_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let cfg = IndexConfig { write_mode: WriteMode::Upsert, id_field: "key".into(), ..config(3) };
        let w = worker(store.clone(), cfg);
        let err = w.process(&batch(0, &["a"]), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingIdentifier);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn call_timeout_is_retryable() {
        let store = Arc::new(MemoryStore::new());
        store.set_latency(Duration::from_secs(10));
        let cfg = IndexConfig { request_timeout: Duration::from_millis(20), max_retries: 1, ..config(1) };
        let w = worker(store.clone(), cfg);
        let err = w.process(&batch(0, &["a"]), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RetryBudgetExhausted);
        assert!(err.context.contains("Timeout"));
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn exits_cleanly_when_queue_closes() {
        let store = Arc::new(MemoryStore::new());
        let w = worker(store.clone(), config(0));
        let (tx, rx) = batch_queue(4);
        tx.send(batch(0, &["a"])).await.unwrap();
        tx.send(batch(1, &["b"])).await.unwrap();
        drop(tx);
        w.run(rx, &CancellationToken::new()).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_worker_does_not_dequeue() {
        let store = Arc::new(MemoryStore::new());
        let w = worker(store.clone(), config(0));
        let (tx, rx) = batch_queue(4);
        tx.send(batch(0, &["a"])).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        w.run(rx.clone(), &cancel).await.unwrap();
        assert_eq!(store.calls(), 0);
        assert_eq!(rx.lock().await.recv().await.unwrap().id, 0);
    }
}
