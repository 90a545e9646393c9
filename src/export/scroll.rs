use std::path::Path;
use std::time::Duration;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use crate::core::error::{Error, ErrorKind, Result};
use crate::sink::elastic::{hit_to_document, ElasticClient, Hit};

#[derive(Debug, Clone)]
pub struct ScrollOptions {
    pub size: usize,
    pub keep_alive: Duration,     // Per-page scroll timeout
    pub count_timeout: Duration,
}

impl Default for ScrollOptions {
    fn default() -> Self {
        ScrollOptions {
            size: 100,
            keep_alive: Duration::from_secs(10),
            count_timeout: Duration::from_secs(60),
        }
    }
}

/// Query body from an inline string or a file; match-all when neither is given.
pub async fn resolve_query(inline: Option<&str>, file: Option<&Path>) -> Result<Value> {
    let text = match (inline, file) {
        (Some(_), Some(_)) => {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "Scroll cannot accept a query file and a query string.".to_string(),
            ));
        }
        (Some(q), None) => q.to_string(),
        (None, Some(path)) => tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::new(ErrorKind::InvalidArgument, format!("{}: {}", path.display(), e))
        })?,
        (None, None) => return Ok(Value::Object(Default::default())),
    };
    serde_json::from_str(&text)
        .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("Invalid query JSON: {}", e)))
}

/// Page through the whole index, writing one JSON document per line.
pub async fn export<Out: AsyncWrite + Unpin>(
    client: &ElasticClient,
    query: &Value,
    options: &ScrollOptions,
    out: &mut Out,
) -> Result<u64> {
    match client.count(query, options.count_timeout).await {
        Ok(total) => info!("Exporting {} document(s) from {}", total, client.index()),
        Err(err) => warn!("Count failed: {}", err),
    }

    let mut written = 0;
    let mut page = client.start_scroll(query, options.size, options.keep_alive).await?;
    let mut scroll_id = page.scroll_id.take();
    loop {
        if page.hits.hits.is_empty() {
            break;
        }
        written += write_hits(out, page.hits.hits).await?;
        debug!("{} document(s) written", written);

        let Some(id) = scroll_id.as_deref() else {
            break;
        };
        page = client.next_scroll(id, options.keep_alive).await?;
        if let Some(next) = page.scroll_id.take() {
            scroll_id = Some(next);
        }
    }
    out.flush().await.map_err(write_error)?;

    if let Some(id) = scroll_id {
        if let Err(err) = client.clear_scroll(&id).await {
            warn!("Failed to clear scroll context: {}", err);
        }
    }
    info!("Exported {} document(s)", written);
    Ok(written)
}

/// Write hits as newline-delimited JSON, metadata fields merged in.
pub async fn write_hits<Out: AsyncWrite + Unpin>(out: &mut Out, hits: Vec<Hit>) -> Result<u64> {
    let mut written = 0;
    for hit in hits {
        let mut line = serde_json::to_vec(&hit_to_document(hit))
            .map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))?;
        line.push(b'\n');
        out.write_all(&line).await.map_err(write_error)?;
        written += 1;
    }
    Ok(written)
}

fn write_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Internal, format!("output write failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use serde_json::json;

    #[tokio::test]
    async fn query_sources() {
        assert_eq!(resolve_query(None, None).await.unwrap(), json!({}));

        let inline = resolve_query(Some(r#"{"query": {"match_all": {}}}"#), None).await.unwrap();
        assert_eq!(inline["query"]["match_all"], json!({}));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"query": {{"term": {{"user": "kimchy"}}}}}}"#).unwrap();
        let from_file = resolve_query(None, Some(file.path())).await.unwrap();
        assert_eq!(from_file["query"]["term"]["user"], "kimchy");

        let both = resolve_query(Some("{}"), Some(file.path())).await.unwrap_err();
        assert_eq!(both.kind, ErrorKind::InvalidArgument);

        assert!(resolve_query(Some("{oops"), None).await.is_err());
    }

    #[tokio::test]
    async fn writes_one_line_per_hit() {
        let hits: Vec<Hit> = serde_json::from_value(json!([
            {"_index": "idx", "_id": "1", "_source": {"a": 1}},
            {"_index": "idx", "_type": "_doc", "_id": "2", "_source": {"a": 2}}
        ]))
        .unwrap();
        let mut out = Vec::new();
        assert_eq!(write_hits(&mut out, hits).await.unwrap(), 2);

        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0], json!({"a": 1, "_index": "idx", "_id": "1"}));
        assert_eq!(lines[1]["_type"], "_doc");
    }
}
