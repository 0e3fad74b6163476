use super::{
    DeleteByQueryResponse, IndexStats, Script, SearchClient, SearchHit, SearchRequest,
    TaskStatusResponse, UpdateByQueryOptions, UpdateByQueryResponse,
};
use crate::config::EngineConfig;
use crate::core::{MigrationError, Query, Result, TaskId};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value, json};
use tracing::{Level, event};

/// Elasticsearch/OpenSearch REST adapter.
pub struct HttpSearchClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSearchClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(config.search_url.clone(), http))
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.url(path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        event!(Level::DEBUG, method = %method, url = %url, "search backend request");
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Overload and availability responses are retryable; other rejections are not.
pub(crate) fn status_error(status: StatusCode, body: &str) -> MigrationError {
    let transient = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();
    let message = format!("{}: {}", status, body);
    if transient {
        MigrationError::transient(message)
    } else {
        MigrationError::BackendRejected {
            status: status.as_u16(),
            message: body.to_string(),
        }
    }
}

pub(crate) fn search_body(request: &SearchRequest) -> Value {
    let mut body = json!({
        "query": request.query.to_json(),
        "size": request.size,
    });
    if let Some(field) = &request.sort_by {
        body["sort"] = json!([{ field.as_str(): { "order": "asc" } }]);
    }
    if !request.source_fields.is_empty() {
        body["_source"] = json!(request.source_fields);
    }
    body
}

pub(crate) fn parse_hits(response: &Value) -> Vec<SearchHit> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let id = hit.get("_id")?.as_str()?.to_string();
                    Some(SearchHit {
                        id,
                        routing: hit
                            .get("_routing")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        source: hit
                            .get("_source")
                            .and_then(Value::as_object)
                            .cloned()
                            .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_task_status(response: &Value) -> TaskStatusResponse {
    TaskStatusResponse {
        completed: response
            .get("completed")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        error: response.get("error").filter(|e| !e.is_null()).cloned(),
        failures: response
            .pointer("/response/failures")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    }
}

fn task_id(response: &Value) -> Option<TaskId> {
    response.get("task").and_then(Value::as_str).map(TaskId::new)
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn count(&self, index: &str, query: &Query) -> Result<u64> {
        let body = json!({ "query": query.to_json() });
        let response = self
            .send(Method::POST, &format!("{}/_count", index), Some(&body))
            .await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| MigrationError::backend(format!("count response without 'count': {}", response)))
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let body = search_body(request);
        let response = self
            .send(Method::POST, &format!("{}/_search", index), Some(&body))
            .await?;
        Ok(parse_hits(&response))
    }

    async fn update_by_query(
        &self,
        index: &str,
        query: &Query,
        script: &Script,
        options: UpdateByQueryOptions,
    ) -> Result<UpdateByQueryResponse> {
        let mut path = format!(
            "{}/_update_by_query?conflicts=proceed&wait_for_completion={}&refresh={}",
            index, options.wait_for_completion, options.refresh
        );
        if let Some(max_docs) = options.max_docs {
            path.push_str(&format!("&max_docs={}", max_docs));
        }
        let body = json!({ "query": query.to_json(), "script": script.to_json() });
        let response = self.send(Method::POST, &path, Some(&body)).await?;

        if let Some(failures) = response.get("failures").and_then(Value::as_array) {
            if !failures.is_empty() {
                return Err(MigrationError::backend(format!(
                    "update_by_query reported failures: {}",
                    Value::Array(failures.clone())
                )));
            }
        }

        Ok(UpdateByQueryResponse {
            updated: response.get("updated").and_then(Value::as_u64).unwrap_or(0),
            task: task_id(&response),
        })
    }

    async fn delete_by_query(&self, index: &str, query: &Query) -> Result<DeleteByQueryResponse> {
        let path = format!(
            "{}/_delete_by_query?conflicts=proceed&wait_for_completion=false",
            index
        );
        let body = json!({ "query": query.to_json() });
        let response = self.send(Method::POST, &path, Some(&body)).await?;
        Ok(DeleteByQueryResponse {
            task: task_id(&response),
            failures: response
                .get("failures")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusResponse> {
        let response = self
            .send(Method::GET, &format!("_tasks/{}", task_id), None)
            .await?;
        Ok(parse_task_status(&response))
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let url = self.url(index);
        let response = self.http.head(&url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(status_error(status, "")),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        self.send(Method::PUT, index, Some(body)).await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.send(Method::DELETE, index, None).await?;
        Ok(())
    }

    async fn get_mapping(&self, index: &str) -> Result<Map<String, Value>> {
        let response = self
            .send(Method::GET, &format!("{}/_mapping", index), None)
            .await?;
        // Keyed by the concrete index name, which differs from `index` for aliases.
        Ok(response
            .as_object()
            .and_then(|indices| indices.values().next())
            .and_then(|mapping| mapping.pointer("/mappings/properties"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_mapping(&self, index: &str, properties: &Map<String, Value>) -> Result<()> {
        let body = json!({ "properties": properties });
        self.send(Method::PUT, &format!("{}/_mapping", index), Some(&body))
            .await?;
        Ok(())
    }

    async fn index_stats(&self, index: &str) -> Result<IndexStats> {
        let response = self
            .send(Method::GET, &format!("{}/_stats/docs,store", index), None)
            .await?;
        Ok(IndexStats {
            document_count: response
                .pointer("/_all/primaries/docs/count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            size_in_bytes: response
                .pointer("/_all/primaries/store/size_in_bytes")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }

    async fn free_space_bytes(&self) -> Result<u64> {
        let response = self
            .send(Method::GET, "_nodes/stats/fs", None)
            .await?;
        Ok(response
            .get("nodes")
            .and_then(Value::as_object)
            .map(|nodes| {
                nodes
                    .values()
                    .filter_map(|node| node.pointer("/fs/total/available_in_bytes"))
                    .filter_map(Value::as_u64)
                    .sum::<u64>()
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = HttpSearchClient::new("http://localhost:9200/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:9200");
        assert_eq!(client.url("/main/_count"), "http://localhost:9200/main/_count");
        assert_eq!(client.url("_tasks/abc:1"), "http://localhost:9200/_tasks/abc:1");
    }

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, "").is_transient());
        let rejected = status_error(StatusCode::BAD_REQUEST, "mapper_parsing_exception");
        assert!(!rejected.is_transient());
        assert!(matches!(rejected, MigrationError::BackendRejected { status: 400, .. }));
    }

    #[test]
    fn test_search_body_includes_sort_and_source() {
        let request = SearchRequest::new(Query::missing("hidden"), 50)
            .sort_by("id")
            .source_fields(["id", "type"]);
        let body = search_body(&request);
        assert_eq!(body["size"], json!(50));
        assert_eq!(body["sort"], json!([{ "id": { "order": "asc" } }]));
        assert_eq!(body["_source"], json!(["id", "type"]));
    }

    #[test]
    fn test_parse_hits_keeps_routing() {
        let response = json!({
            "hits": { "hits": [
                { "_id": "issue_1", "_routing": "project_1", "_source": { "id": 1, "type": "issue" } },
                { "_id": "issue_2", "_source": { "id": 2, "type": "issue" } },
                { "_source": { "id": 3 } }
            ]}
        });
        let hits = parse_hits(&response);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].routing.as_deref(), Some("project_1"));
        assert_eq!(hits[1].routing, None);
    }

    #[test]
    fn test_parse_task_status_variants() {
        let running = parse_task_status(&json!({ "completed": false, "task": {} }));
        assert!(!running.completed);
        assert!(running.error.is_none());

        let failed = parse_task_status(&json!({
            "completed": true,
            "error": { "type": "es_rejected_execution_exception" }
        }));
        assert!(failed.completed);
        assert!(failed.error.is_some());

        let partial = parse_task_status(&json!({
            "completed": true,
            "response": { "failures": [{ "cause": "version_conflict" }] }
        }));
        assert_eq!(partial.failures.len(), 1);
    }
}
