use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use crate::core::error::{Error, ErrorKind, Result};

/// Fields starting with this prefix are store-assigned metadata
pub const RESERVED_PREFIX: char = '_';

/// One input record: a JSON object
pub type Document = Map<String, Value>;

/// Ordered group of documents written with a single bulk call
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: u64,
    pub docs: Vec<Document>,
}

impl Batch {
    pub fn new(id: u64, capacity: usize) -> Self {
        Batch {
            id,
            docs: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Insert or overwrite the whole document
    Index,
    /// Partial update, creating the document if it does not exist
    Upsert,
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "index" => Ok(WriteMode::Index),
            "update" | "upsert" => Ok(WriteMode::Upsert),
            other => Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Unknown index action {:?} (expected \"index\" or \"update\")", other),
            )),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WriteMode::Index => write!(f, "index"),
            WriteMode::Upsert => write!(f, "update"),
        }
    }
}

/// A single document the store refused to write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub id: Option<String>,
    pub detail: String,
}

/// Copy of `doc` without reserved-prefix fields.
pub fn strip_reserved(doc: &Document) -> Document {
    doc.iter()
        .filter(|(k, _)| !k.starts_with(RESERVED_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Stringified write identifier taken from `field`, if present.
pub fn document_id(doc: &Document, field: &str) -> Option<String> {
    match doc.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
