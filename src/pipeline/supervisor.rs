use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use crate::core::config::IndexConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::{PipelineStats, StatsSnapshot};
use crate::pipeline::{batch_queue, BatchAssembler, WorkerPool};
use crate::sink::BulkWriter;
use crate::source::DocumentSource;
use crate::throttle::adaptive::AdaptiveThrottle;

/// Runs the assembler and the worker pool as one cancellable group.
///
/// The first task to fail cancels every other task, and its error becomes
/// the result of [`Supervisor::run`].
pub struct Supervisor<W> {
    config: Arc<IndexConfig>,
    writer: Arc<W>,
    throttle: Arc<AdaptiveThrottle>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl<W: BulkWriter + 'static> Supervisor<W> {
    pub fn new(config: IndexConfig, writer: Arc<W>) -> Result<Self> {
        config.validate()?;
        let throttle = Arc::new(AdaptiveThrottle::new(config.throttle.clone()));
        Ok(Supervisor {
            config: Arc::new(config),
            writer,
            throttle,
            stats: Arc::new(PipelineStats::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the whole pipeline when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn throttle(&self) -> &Arc<AdaptiveThrottle> {
        &self.throttle
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Load every document from `source` into the writer.
    pub async fn run<S: DocumentSource + 'static>(&self, source: S) -> Result<StatsSnapshot> {
        let workers = WorkerPool::new(
            self.writer.clone(),
            self.throttle.clone(),
            self.config.clone(),
            self.stats.clone(),
        );
        let (tx, rx) = batch_queue(self.config.queue_capacity());
        let mut tasks = JoinSet::new();

        workers.spawn(&mut tasks, &rx, &self.cancel);
        drop(rx);

        let assembler = BatchAssembler::new(source, &self.config, self.stats.clone());
        let cancel = self.cancel.clone();
        tasks.spawn(async move {
            info!("producer started");
            let result = assembler.run(tx, cancel.clone()).await.map(|_| ());
            if let Err(err) = &result {
                error!("producer failed: {}", err);
                cancel.cancel();
            }
            result
        });
        info!("{} worker(s) started, queue capacity {}", workers.size(), self.config.queue_capacity());

        let mut first_error: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(Error::new(ErrorKind::Internal, format!("pipeline task aborted: {}", e)))
            });
            if let Err(err) = result {
                self.cancel.cancel();
                first_error.get_or_insert(err);
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            return Err(Error::new(
                ErrorKind::Cancelled,
                "pipeline cancelled before the input was drained".to_string(),
            ));
        }

        let stats = self.stats.snapshot();
        info!(
            "Indexed {} document(s) in {} batch(es), {} retries, {:.2}s throttled",
            stats.documents_written, stats.batches_written, stats.retries, stats.throttle_secs
        );
        Ok(stats)
    }
}
