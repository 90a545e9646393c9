use std::time::Duration;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocumentFailure;
use crate::sink::{BulkAction, BulkRequest, BulkResponse, BulkWriter};

/// Minimal Elasticsearch HTTP client: bulk writes, scroll reads, counts
#[derive(Clone)]
pub struct ElasticClient {
    http: reqwest::Client,
    base_url: String,
    index: String,
    doc_type: Option<String>,
}

/// One page of a scroll
#[derive(Debug, Clone, Deserialize)]
pub struct ScrollPage {
    #[serde(rename = "_scroll_id")]
    pub scroll_id: Option<String>,
    pub hits: ScrollHits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrollHits {
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type", default)]
    pub doc_type: Option<String>,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
}

impl ElasticClient {
    /// `host` is `host:port` or a full URL. A `doc_type` of `None` (or
    /// `_doc`) leaves the mapping type out of requests.
    pub fn new(host: &str, index: &str, doc_type: Option<&str>) -> Result<Self> {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };
        let http = reqwest::Client::builder()
            .gzip(true)
            .build()
            .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("HTTP client: {}", e)))?;

        Ok(ElasticClient {
            http,
            base_url,
            index: index.to_string(),
            doc_type: doc_type.filter(|t| *t != "_doc").map(str::to_string),
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// NDJSON body for a bulk request
    pub fn bulk_body(&self, request: &BulkRequest) -> Result<String> {
        let mut body = String::new();
        for action in &request.actions {
            let (op, meta_id, source) = match action {
                BulkAction::Index { id, doc } => ("index", id.as_deref(), Value::Object(doc.clone())),
                BulkAction::Upsert { id, doc } => (
                    "update",
                    Some(id.as_str()),
                    json!({ "doc": doc, "doc_as_upsert": true }),
                ),
            };
            let mut meta = Map::new();
            meta.insert("_index".to_string(), Value::String(self.index.clone()));
            if let Some(doc_type) = &self.doc_type {
                meta.insert("_type".to_string(), Value::String(doc_type.clone()));
            }
            if let Some(id) = meta_id {
                meta.insert("_id".to_string(), Value::String(id.to_string()));
            }
            let mut line = Map::new();
            line.insert(op.to_string(), Value::Object(meta));
            body.push_str(&serde_json::to_string(&line)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&source)?);
            body.push('\n');
        }
        Ok(body)
    }

    pub async fn count(&self, query: &Value, timeout: Duration) -> Result<u64> {
        let url = format!("{}/{}/_count", self.base_url, self.index);
        let res = self.http.post(url).json(query).timeout(timeout).send().await?;
        let value: Value = checked_json(res).await?;
        value["count"].as_u64().ok_or_else(|| {
            Error::new(ErrorKind::Transport, format!("unexpected count response: {}", value))
        })
    }

    pub async fn start_scroll(&self, query: &Value, size: usize, keep_alive: Duration) -> Result<ScrollPage> {
        let url = format!(
            "{}/{}/_search?scroll={}&size={}",
            self.base_url,
            self.index,
            keep_alive_param(keep_alive),
            size
        );
        let res = self.http.post(url).json(query).timeout(keep_alive).send().await?;
        parse_page(checked_json(res).await?)
    }

    pub async fn next_scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<ScrollPage> {
        let url = format!("{}/_search/scroll", self.base_url);
        let body = json!({ "scroll": keep_alive_param(keep_alive), "scroll_id": scroll_id });
        let res = self.http.post(url).json(&body).timeout(keep_alive).send().await?;
        parse_page(checked_json(res).await?)
    }

    pub async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let url = format!("{}/_search/scroll", self.base_url);
        self.http
            .delete(url)
            .json(&json!({ "scroll_id": scroll_id }))
            .send()
            .await?;
        Ok(())
    }
}

impl BulkWriter for ElasticClient {
    async fn bulk(&self, request: &BulkRequest, timeout: Duration) -> Result<BulkResponse> {
        let body = self.bulk_body(request)?;
        debug!(batch = request.batch_id, "Batch size = {} ({} bytes)", request.len(), body.len());

        let res = self
            .http
            .post(format!("{}/_bulk", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .timeout(timeout)
            .send()
            .await?;
        let value = checked_json(res).await?;
        Ok(parse_bulk_response(&value))
    }
}

/// Collect per-item errors from a `_bulk` response body.
pub fn parse_bulk_response(value: &Value) -> BulkResponse {
    let mut failures = Vec::new();
    if value["errors"].as_bool() == Some(false) {
        return BulkResponse { failures };
    }
    let items = value["items"].as_array().map(Vec::as_slice).unwrap_or_default();
    for item in items {
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        let status = result["status"].as_u64().unwrap_or(0);
        if result.get("error").is_some() || status >= 300 {
            failures.push(DocumentFailure {
                id: result["_id"].as_str().map(str::to_string),
                detail: result.get("error").map(Value::to_string).unwrap_or_else(|| format!("status {}", status)),
            });
        }
    }
    BulkResponse { failures }
}

/// Flatten a hit into its source plus `_index`, `_type`, `_id`.
pub fn hit_to_document(hit: Hit) -> Map<String, Value> {
    let mut doc = hit.source;
    doc.insert("_index".to_string(), Value::String(hit.index));
    if let Some(doc_type) = hit.doc_type {
        doc.insert("_type".to_string(), Value::String(doc_type));
    }
    doc.insert("_id".to_string(), Value::String(hit.id));
    doc
}

fn parse_page(value: Value) -> Result<ScrollPage> {
    serde_json::from_value(value)
        .map_err(|e| Error::new(ErrorKind::Transport, format!("unexpected scroll response: {}", e)))
}

fn keep_alive_param(keep_alive: Duration) -> String {
    format!("{}ms", keep_alive.as_millis().max(1))
}

async fn checked_json(res: reqwest::Response) -> Result<Value> {
    let status = res.status();
    if !status.is_success() {
        let text = res.text().await.unwrap_or_default();
        return Err(Error::new(ErrorKind::Transport, format!("HTTP {}: {}", status, text)));
    }
    Ok(res.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn normalizes_host() {
        let c = ElasticClient::new("localhost:9200", "idx", Some("_doc")).unwrap();
        assert_eq!(c.base_url, "http://localhost:9200");
        assert_eq!(c.doc_type, None);
        let c = ElasticClient::new("https://es.local/", "idx", Some("event")).unwrap();
        assert_eq!(c.base_url, "https://es.local");
        assert_eq!(c.doc_type.as_deref(), Some("event"));
    }

    #[test]
    fn bulk_body_lines() {
        let c = ElasticClient::new("localhost:9200", "idx", None).unwrap();
        let req = BulkRequest {
            batch_id: 0,
            actions: vec![
                BulkAction::Index { id: Some("1".into()), doc: doc(json!({"a": 1})) },
                BulkAction::Index { id: None, doc: doc(json!({"a": 2})) },
                BulkAction::Upsert { id: "3".into(), doc: doc(json!({"a": 3})) },
            ],
        };
        let body = c.bulk_body(&req).unwrap();
        let lines: Vec<Value> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], json!({"index": {"_index": "idx", "_id": "1"}}));
        assert_eq!(lines[1], json!({"a": 1}));
        assert_eq!(lines[2], json!({"index": {"_index": "idx"}}));
        assert_eq!(lines[4], json!({"update": {"_index": "idx", "_id": "3"}}));
        assert_eq!(lines[5], json!({"doc": {"a": 3}, "doc_as_upsert": true}));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn parses_item_failures() {
        let res = json!({
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 400, "error": {"type": "mapper_parsing_exception"}}},
                {"update": {"_id": "3", "status": 429, "error": {"type": "es_rejected_execution_exception"}}}
            ]
        });
        let parsed = parse_bulk_response(&res);
        assert_eq!(parsed.failures.len(), 2);
        assert_eq!(parsed.failures[0].id.as_deref(), Some("2"));
        assert!(parsed.failures[0].detail.contains("mapper_parsing_exception"));
        assert_eq!(parsed.failures[1].id.as_deref(), Some("3"));
    }

    #[test]
    fn clean_response_has_no_failures() {
        let res = json!({"errors": false, "items": [{"index": {"_id": "1", "status": 200}}]});
        assert!(parse_bulk_response(&res).is_success());
    }

    #[test]
    fn flattens_hits() {
        let page: ScrollPage = serde_json::from_value(json!({
            "_scroll_id": "abc",
            "hits": {"hits": [
                {"_index": "idx", "_type": "_doc", "_id": "9", "_source": {"title": "t"}}
            ]}
        }))
        .unwrap();
        assert_eq!(page.scroll_id.as_deref(), Some("abc"));
        let hit = page.hits.hits.into_iter().next().unwrap();
        assert_eq!(
            hit_to_document(hit),
            doc(json!({"title": "t", "_index": "idx", "_type": "_doc", "_id": "9"}))
        );
    }
}
