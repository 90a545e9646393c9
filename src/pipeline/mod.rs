use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use crate::core::types::Batch;

pub mod assembler;
pub mod worker;
pub mod supervisor;

pub use assembler::BatchAssembler;
pub use worker::WorkerPool;
pub use supervisor::Supervisor;

/// Producer side of the batch queue
pub type BatchSender = mpsc::Sender<Batch>;

/// Consumer side of the batch queue, shared by every worker
pub type BatchReceiver = Arc<Mutex<mpsc::Receiver<Batch>>>;

/// Bounded hand-off between the assembler and the workers.
pub fn batch_queue(capacity: usize) -> (BatchSender, BatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, Arc::new(Mutex::new(rx)))
}
