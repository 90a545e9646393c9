use std::future::Future;
use std::collections::VecDeque;
use crate::core::error::Result;
use crate::core::types::Document;

pub mod json_stream;

pub use json_stream::JsonStreamSource;

/// Lazy, single-pass sequence of documents
pub trait DocumentSource: Send {
    /// Next document, `Ok(None)` at end of stream.
    fn next_document(&mut self) -> impl Future<Output = Result<Option<Document>>> + Send;
}

/// In-memory source, yields pre-built results in order
#[derive(Debug, Default)]
pub struct VecSource {
    items: VecDeque<Result<Document>>,
}

impl VecSource {
    pub fn new(docs: Vec<Document>) -> Self {
        VecSource {
            items: docs.into_iter().map(Ok).collect(),
        }
    }

    /// Source that yields `docs` and then fails with `err` instead of ending.
    pub fn failing_after(docs: Vec<Document>, err: crate::core::error::Error) -> Self {
        let mut source = Self::new(docs);
        source.items.push_back(Err(err));
        source
    }
}

impl DocumentSource for VecSource {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        self.items.pop_front().transpose()
    }
}
