use tokio::io::{AsyncRead, AsyncReadExt, Stdin};
use serde_json::{Deserializer, Value};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Document;
use crate::source::DocumentSource;

const READ_CHUNK: usize = 8 * 1024;

/// A continuous stream of JSON objects read from an async reader.
///
/// Objects may span lines (pretty-printed) or sit back to back on one line;
/// any whitespace between them is skipped. A value that is not an object is
/// a read failure.
pub struct JsonStreamSource<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    docs_read: u64,
}

impl JsonStreamSource<Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin + Send> JsonStreamSource<R> {
    pub fn new(reader: R) -> Self {
        JsonStreamSource {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
            eof: false,
            docs_read: 0,
        }
    }

    pub fn documents_read(&self) -> u64 {
        self.docs_read
    }

    /// Drop consumed bytes and append the next chunk. Grows the read with the
    /// pending value so a large document is not re-parsed once per 8 KiB.
    async fn fill(&mut self) -> Result<()> {
        self.buf.drain(..self.pos);
        self.pos = 0;
        self.buf.reserve(READ_CHUNK.max(self.buf.len()));
        let n = self.reader.read_buf(&mut self.buf).await.map_err(|e| {
            Error::new(
                ErrorKind::SourceRead,
                format!("document {}: {}", self.docs_read + 1, e),
            )
        })?;
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

impl<R: AsyncRead + Unpin + Send> DocumentSource for JsonStreamSource<R> {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        loop {
            let (next, used) = {
                let mut stream = Deserializer::from_slice(&self.buf[self.pos..]).into_iter::<Value>();
                let next = stream.next();
                (next, stream.byte_offset())
            };
            match next {
                Some(Ok(value)) => {
                    self.pos += used;
                    self.docs_read += 1;
                    return match value {
                        Value::Object(doc) => Ok(Some(doc)),
                        other => Err(Error::new(
                            ErrorKind::SourceRead,
                            format!("document {}: expected a JSON object, got {}", self.docs_read, other),
                        )),
                    };
                }
                // value cut off at the end of the buffer
                Some(Err(e)) if e.is_eof() && !self.eof => self.fill().await?,
                Some(Err(e)) if e.is_eof() => {
                    return Err(Error::new(
                        ErrorKind::SourceRead,
                        format!("document {}: unexpected end of input", self.docs_read + 1),
                    ));
                }
                Some(Err(e)) => {
                    return Err(Error::new(
                        ErrorKind::SourceRead,
                        format!("document {}: {}", self.docs_read + 1, e),
                    ));
                }
                // only whitespace left
                None if self.eof => return Ok(None),
                None => {
                    self.pos = self.buf.len();
                    self.fill().await?;
                }
            }
        }
    }
}
