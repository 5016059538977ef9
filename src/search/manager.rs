//! Search engine client with graceful degradation.
//!
//! The manager talks to an Elasticsearch-compatible HTTP API. Search is an
//! accelerator, not a source of truth: when the engine cannot be reached
//! every read returns the "Search unavailable" sentinel and every write is
//! dropped as [`BestEffort::Dropped`]. A later successful health check
//! flips the manager back to available.

use super::indices::global_fields;
use super::query::{AnalyticsResults, Bucket, SearchHit, SearchQuery, SearchResults};
use super::IndexFamily;
use crate::config::SearchConfig;
use crate::storage::state::StateCell;
use crate::storage::{
    Backend, BackendHealth, BackendId, BestEffort, ConnectionState, RetryPolicy, retry_connection,
};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Outcome of [`SearchIndexManager::ensure_indices`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexReport {
    /// Indices created by this call.
    pub created: Vec<String>,
    /// Indices that already existed and were left untouched.
    pub existing: Vec<String>,
}

/// Why a request did not produce a usable response.
enum Failure {
    /// The engine could not be reached; the manager is now unavailable.
    Unreachable(String),
    /// The engine answered with an error.
    Engine(Error),
}

/// Client for the search engine.
#[derive(Debug)]
pub struct SearchIndexManager {
    config: SearchConfig,
    client: reqwest::Client,
    base_url: Option<Url>,
    available: AtomicBool,
    indices_declared: AtomicBool,
    state: StateCell,
}

impl SearchIndexManager {
    /// Builds the HTTP client. No request is made until [`Self::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the URL is invalid or the client
    /// cannot be built.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| {
                Url::parse(u).map_err(|e| Error::Configuration(format!("search: invalid url: {e}")))
            })
            .transpose()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .danger_accept_invalid_certs(!config.tls_verify)
            .build()
            .map_err(|e| Error::Configuration(format!("search: cannot build client: {e}")))?;

        if !config.tls_verify {
            tracing::warn!("Search TLS certificate verification is disabled");
        }

        Ok(Self {
            config: config.clone(),
            client,
            base_url,
            available: AtomicBool::new(false),
            indices_declared: AtomicBool::new(false),
            state: StateCell::new(BackendId::Search),
        })
    }

    /// Probes the cluster and declares the indices.
    ///
    /// An unreachable engine leaves the manager unavailable and returns
    /// `Ok`, unless `search.required` is set. In that mode the probe is
    /// retried per `policy` and failure is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] in required mode when the engine cannot
    /// be reached or the indices cannot be declared.
    pub async fn initialize(&self, policy: &RetryPolicy) -> Result<()> {
        if self.base_url.is_none() {
            if self.config.required {
                return Err(Error::Configuration(
                    "search is required but no url is configured".to_string(),
                ));
            }
            tracing::info!(backend = %BackendId::Search, "Search disabled; no url configured");
            self.state.disconnected(Some("search disabled"));
            return Ok(());
        }

        let policy = if self.config.required {
            *policy
        } else {
            RetryPolicy::once()
        };
        let probed = retry_connection(&policy, BackendId::Search, |attempt| {
            self.state.connecting(attempt);
            async move { self.probe().await }
        })
        .await;

        let outcome = match probed {
            Ok(_) => self.ensure_indices().await.map(|_| ()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.mark_available();
                Ok(())
            },
            Err(e) if self.config.required => {
                self.state.disconnected(Some(&e.to_string()));
                Err(e)
            },
            Err(e) => {
                self.mark_unavailable(&e.to_string());
                self.state.disconnected(Some(&e.to_string()));
                tracing::warn!(
                    backend = %BackendId::Search,
                    error = %e,
                    "Search unavailable; continuing in degraded mode"
                );
                Ok(())
            },
        }
    }

    /// Returns true when the engine is reachable.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Full index name for a family.
    #[must_use]
    pub fn index_name(&self, family: IndexFamily) -> String {
        family.index_name(&self.config.index_prefix)
    }

    /// Creates any declared index that does not exist.
    ///
    /// Existing indices are never recreated or altered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the engine is unreachable, or
    /// [`Error::Query`] if it rejects an index definition.
    pub async fn ensure_indices(&self) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        for family in IndexFamily::ALL {
            let index = self.index_name(family);
            let head = self.send(Method::HEAD, &[&index], None).await;
            let status = match head {
                Ok(response) => response.status(),
                Err(failure) => return Err(self.failure_into_error(failure, "ensure_indices")),
            };

            if status.is_success() {
                report.existing.push(index);
                continue;
            }
            if status != StatusCode::NOT_FOUND {
                return Err(engine_error("ensure_indices", &index, status, ""));
            }

            let created = self
                .send(Method::PUT, &[&index], Some(&family.mappings()))
                .await;
            match created {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(index = %index, "Created search index");
                    report.created.push(index);
                },
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    // Lost a creation race with another instance.
                    if body.contains("resource_already_exists_exception") {
                        report.existing.push(index);
                    } else {
                        return Err(engine_error("create_index", &index, status, &body));
                    }
                },
                Err(failure) => return Err(self.failure_into_error(failure, "create_index")),
            }
        }

        self.indices_declared.store(true, Ordering::Release);
        tracing::debug!(
            created = report.created.len(),
            existing = report.existing.len(),
            "Search indices ensured"
        );
        Ok(report)
    }

    /// Searches one family.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] if the engine rejects the request. An
    /// unreachable engine yields the unavailable sentinel instead.
    pub async fn search_entities(
        &self,
        family: IndexFamily,
        query: &SearchQuery,
    ) -> Result<SearchResults> {
        if !self.is_available() {
            return Ok(SearchResults::unavailable());
        }
        let body = query.to_body(&family.boosted_fields(), Some(family));
        self.run_search("search_entities", &self.index_name(family), &body)
            .await
    }

    /// Searches tickets.
    ///
    /// # Errors
    ///
    /// Same as [`Self::search_entities`].
    pub async fn search_tickets(&self, query: &SearchQuery) -> Result<SearchResults> {
        self.search_entities(IndexFamily::Tickets, query).await
    }

    /// Searches tickets, knowledge articles and assets at once.
    ///
    /// # Errors
    ///
    /// Same as [`Self::search_entities`].
    pub async fn global_search(&self, text: &str, size: usize) -> Result<SearchResults> {
        if !self.is_available() {
            return Ok(SearchResults::unavailable());
        }
        let indices = IndexFamily::GLOBAL
            .iter()
            .map(|f| self.index_name(*f))
            .collect::<Vec<_>>()
            .join(",");
        let body = SearchQuery::new(text)
            .with_page(0, size)
            .to_body(&global_fields(&IndexFamily::GLOBAL), None);
        self.run_search("global_search", &indices, &body).await
    }

    /// Prefix completions from the family's title field.
    ///
    /// # Errors
    ///
    /// Same as [`Self::search_entities`].
    pub async fn suggestions(
        &self,
        family: IndexFamily,
        prefix: &str,
        size: usize,
    ) -> Result<SearchResults<String>> {
        if !self.is_available() {
            return Ok(SearchResults::unavailable());
        }
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(SearchResults::empty());
        }

        let title = family.title_field();
        let body = json!({
            "size": size.clamp(1, super::query::MAX_PAGE_SIZE),
            "_source": [title],
            "query": {
                "multi_match": {
                    "query": prefix,
                    "type": "phrase_prefix",
                    "fields": [title]
                }
            }
        });
        let page = self
            .run_search("suggestions", &self.index_name(family), &body)
            .await?;
        if page.is_unavailable() {
            return Ok(SearchResults::unavailable());
        }

        let mut items: Vec<String> = Vec::with_capacity(page.items.len());
        for hit in page.items {
            if let Some(text) = hit.source.get(title).and_then(Value::as_str) {
                if !items.iter().any(|s| s == text) {
                    items.push(text.to_string());
                }
            }
        }
        Ok(SearchResults {
            total: page.total,
            took_ms: page.took_ms,
            items,
            message: None,
        })
    }

    /// Facet counts per keyword field plus documents created per day.
    ///
    /// # Errors
    ///
    /// Same as [`Self::search_entities`].
    pub async fn analytics(
        &self,
        family: IndexFamily,
        filters: &BTreeMap<String, Value>,
    ) -> Result<AnalyticsResults> {
        if !self.is_available() {
            return Ok(AnalyticsResults::unavailable());
        }

        let mut query = SearchQuery::new("");
        query.filters.clone_from(filters);
        let mut body = query.to_body(&[], Some(family));
        body["size"] = json!(0);
        if let Some(object) = body.as_object_mut() {
            object.remove("sort");
            object.remove("highlight");
            object.remove("from");
        }

        let mut aggs = serde_json::Map::new();
        for field in family.keyword_fields() {
            aggs.insert(
                (*field).to_string(),
                json!({ "terms": { "field": field, "size": 20 } }),
            );
        }
        aggs.insert(
            "created_per_day".to_string(),
            json!({
                "date_histogram": {
                    "field": "created_at",
                    "calendar_interval": "day",
                    "format": "yyyy-MM-dd"
                }
            }),
        );
        body["aggs"] = Value::Object(aggs);

        let index = self.index_name(family);
        let response = match self.search_request("analytics", &index, &body).await {
            Ok(response) => response,
            Err(Failure::Unreachable(_)) => return Ok(AnalyticsResults::unavailable()),
            Err(Failure::Engine(e)) => return Err(e),
        };
        Ok(parse_analytics(&response))
    }

    /// Writes a document into a family's index.
    ///
    /// The document is stamped with `indexed_at`. Failures are logged and
    /// counted, never raised.
    pub async fn index_document(
        &self,
        family: IndexFamily,
        id: &str,
        document: &Value,
    ) -> BestEffort {
        const OPERATION: &str = "index_document";
        if !self.is_available() {
            return BestEffort::dropped(BackendId::Search, OPERATION, "search unavailable");
        }

        let mut document = document.clone();
        match document.as_object_mut() {
            Some(object) => {
                object.insert(
                    "indexed_at".to_string(),
                    Value::String(chrono::Utc::now().to_rfc3339()),
                );
            },
            None => {
                return BestEffort::dropped(
                    BackendId::Search,
                    OPERATION,
                    "document must be a JSON object",
                );
            },
        }

        let index = self.index_name(family);
        match self
            .send(Method::PUT, &[&index, "_doc", id], Some(&document))
            .await
        {
            Ok(response) if response.status().is_success() => BestEffort::Applied,
            Ok(response) => BestEffort::dropped(
                BackendId::Search,
                OPERATION,
                format!("{index}: engine returned {}", response.status()),
            ),
            Err(Failure::Unreachable(cause) | Failure::Engine(Error::Query { cause, .. })) => {
                BestEffort::dropped(BackendId::Search, OPERATION, cause)
            },
            Err(Failure::Engine(e)) => BestEffort::dropped(BackendId::Search, OPERATION, e.to_string()),
        }
    }

    /// Removes a document from a family's index.
    ///
    /// A missing document counts as applied.
    pub async fn delete_document(&self, family: IndexFamily, id: &str) -> BestEffort {
        const OPERATION: &str = "delete_document";
        if !self.is_available() {
            return BestEffort::dropped(BackendId::Search, OPERATION, "search unavailable");
        }

        let index = self.index_name(family);
        match self.send(Method::DELETE, &[&index, "_doc", id], None).await {
            Ok(response)
                if response.status().is_success() || response.status() == StatusCode::NOT_FOUND =>
            {
                BestEffort::Applied
            },
            Ok(response) => BestEffort::dropped(
                BackendId::Search,
                OPERATION,
                format!("{index}: engine returned {}", response.status()),
            ),
            Err(Failure::Unreachable(cause)) => {
                BestEffort::dropped(BackendId::Search, OPERATION, cause)
            },
            Err(Failure::Engine(e)) => BestEffort::dropped(BackendId::Search, OPERATION, e.to_string()),
        }
    }

    /// Runs a `_search` request and parses hits.
    async fn run_search(
        &self,
        operation: &'static str,
        index: &str,
        body: &Value,
    ) -> Result<SearchResults> {
        match self.search_request(operation, index, body).await {
            Ok(response) => Ok(parse_hits(&response, &self.config.index_prefix)),
            Err(Failure::Unreachable(_)) => Ok(SearchResults::unavailable()),
            Err(Failure::Engine(e)) => Err(e),
        }
    }

    async fn search_request(
        &self,
        operation: &'static str,
        index: &str,
        body: &Value,
    ) -> std::result::Result<Value, Failure> {
        let started = Instant::now();
        let response = self
            .send(Method::POST, &[index, "_search"], Some(body))
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(index, operation, status = %status, "Search request rejected");
            return Err(Failure::Engine(engine_error(operation, index, status, &text)));
        }
        let parsed = response.json::<Value>().await.map_err(|e| {
            Failure::Engine(Error::Query {
                operation: format!("search.{operation}"),
                statement: index.to_string(),
                cause: format!("invalid response body: {e}"),
            })
        })?;
        tracing::debug!(
            index,
            operation,
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Search request completed"
        );
        Ok(parsed)
    }

    /// Sends a request; transport failures flip the manager to unavailable.
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
    ) -> std::result::Result<reqwest::Response, Failure> {
        let url = self.url(segments).map_err(Failure::Engine)?;
        let mut request = self.client.request(method, url);
        if let Some(username) = &self.config.username {
            let password = self
                .config
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string());
            request = request.basic_auth(username, password);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() || e.is_request() {
                let cause = e.to_string();
                self.mark_unavailable(&cause);
                Failure::Unreachable(cause)
            } else {
                Failure::Engine(Error::OperationFailed {
                    operation: "search_request".to_string(),
                    cause: e.to_string(),
                })
            }
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self
            .base_url
            .clone()
            .ok_or_else(|| Error::Configuration("search url is not configured".to_string()))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| Error::Configuration("search url cannot be a base".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// Requests the cluster root.
    async fn probe(&self) -> Result<u64> {
        let started = Instant::now();
        match self.send(Method::GET, &[], None).await {
            Ok(response) if response.status().is_success() => {
                Ok(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
            },
            Ok(response) => Err(Error::Connection {
                backend: BackendId::Search,
                attempts: 1,
                cause: format!("cluster returned {}", response.status()),
            }),
            Err(failure) => Err(self.failure_into_error(failure, "probe")),
        }
    }

    fn failure_into_error(&self, failure: Failure, operation: &str) -> Error {
        match failure {
            Failure::Unreachable(cause) => Error::Connection {
                backend: BackendId::Search,
                attempts: 1,
                cause: format!("{operation}: {cause}"),
            },
            Failure::Engine(e) => e,
        }
    }

    fn mark_available(&self) {
        if !self.available.swap(true, Ordering::AcqRel) {
            tracing::info!(backend = %BackendId::Search, "Search available");
        }
        self.state.connected();
    }

    fn mark_unavailable(&self, cause: &str) {
        if self.available.swap(false, Ordering::AcqRel) {
            metrics::counter!("deskstore_search_degraded_total").increment(1);
            tracing::warn!(backend = %BackendId::Search, cause, "Search became unavailable");
        }
        self.state.degraded(cause);
    }
}

#[async_trait]
impl Backend for SearchIndexManager {
    fn id(&self) -> BackendId {
        BackendId::Search
    }

    fn state(&self) -> ConnectionState {
        self.state.snapshot()
    }

    async fn health_check(&self) -> BackendHealth {
        if self.base_url.is_none() {
            return BackendHealth::unhealthy(BackendId::Search, "search disabled", None);
        }
        match self.probe().await {
            Ok(latency_ms) => {
                // The engine was down at startup; declare the mappings before
                // any write can auto-create an index.
                if !self.indices_declared.load(Ordering::Acquire)
                    && let Err(e) = self.ensure_indices().await
                {
                    let error = e.to_string();
                    self.mark_unavailable(&error);
                    return BackendHealth::unhealthy(BackendId::Search, error, None);
                }
                self.mark_available();
                BackendHealth::healthy(BackendId::Search, latency_ms, None)
            },
            Err(e) => {
                let error = e.to_string();
                self.mark_unavailable(&error);
                BackendHealth::unhealthy(BackendId::Search, error, None)
            },
        }
    }

    async fn close(&self) {
        self.available.store(false, Ordering::Release);
        self.state.disconnected(None);
    }
}

fn engine_error(operation: &str, index: &str, status: StatusCode, body: &str) -> Error {
    let reason = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["reason"]
                .as_str()
                .map(String::from)
                .or_else(|| v["error"].as_str().map(String::from))
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    Error::Query {
        operation: format!("search.{operation}"),
        statement: index.to_string(),
        cause: if reason.is_empty() {
            format!("engine returned {status}")
        } else {
            format!("engine returned {status}: {reason}")
        },
    }
}

fn parse_hits(response: &Value, prefix: &str) -> SearchResults {
    let hits = &response["hits"];
    let total = hits["total"]["value"]
        .as_u64()
        .or_else(|| hits["total"].as_u64())
        .unwrap_or(0);
    let items = hits["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .map(|hit| {
                    let index = hit["_index"].as_str().unwrap_or_default().to_string();
                    SearchHit {
                        id: hit["_id"].as_str().unwrap_or_default().to_string(),
                        family: IndexFamily::from_index_name(prefix, &index),
                        index,
                        score: hit["_score"].as_f64(),
                        source: hit["_source"].clone(),
                        highlight: hit.get("highlight").cloned(),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    SearchResults {
        items,
        total,
        took_ms: response["took"].as_u64(),
        message: None,
    }
}

fn parse_analytics(response: &Value) -> AnalyticsResults {
    let mut buckets = BTreeMap::new();
    if let Some(aggs) = response["aggregations"].as_object() {
        for (name, agg) in aggs {
            let parsed = agg["buckets"]
                .as_array()
                .map(|raw| {
                    raw.iter()
                        .map(|b| Bucket {
                            key: b["key_as_string"].as_str().map_or_else(
                                || match &b["key"] {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                },
                                String::from,
                            ),
                            doc_count: b["doc_count"].as_u64().unwrap_or(0),
                        })
                        .collect()
                })
                .unwrap_or_default();
            buckets.insert(name.clone(), parsed);
        }
    }
    AnalyticsResults {
        buckets,
        total: response["hits"]["total"]["value"].as_u64().unwrap_or(0),
        message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_manager(required: bool) -> SearchIndexManager {
        let config = SearchConfig {
            required,
            connect_timeout_ms: 200,
            request_timeout_ms: 500,
            ..SearchConfig::at("http://127.0.0.1:1")
        };
        SearchIndexManager::new(&config).unwrap_or_else(|e| unreachable!("{e}"))
    }

    #[tokio::test]
    async fn test_unreachable_engine_degrades() {
        let manager = unreachable_manager(false);
        let result = manager.initialize(&RetryPolicy::new(3, 0)).await;
        assert!(result.is_ok());
        assert!(!manager.is_available());

        let page = manager
            .search_tickets(&SearchQuery::new("printer"))
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(page.is_unavailable());
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);

        let global = manager.global_search("printer", 10).await;
        assert!(global.is_ok_and(|p| p.is_unavailable()));

        let suggestions = manager
            .suggestions(IndexFamily::KnowledgeArticles, "pri", 5)
            .await;
        assert!(suggestions.is_ok_and(|p| p.is_unavailable()));

        let analytics = manager
            .analytics(IndexFamily::Tickets, &BTreeMap::new())
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(analytics.buckets.is_empty());
        assert_eq!(analytics.message.as_deref(), Some("Search unavailable"));

        let write = manager
            .index_document(IndexFamily::Tickets, "1", &json!({"title": "x"}))
            .await;
        assert!(!write.succeeded());
        let delete = manager.delete_document(IndexFamily::Tickets, "1").await;
        assert!(!delete.succeeded());
    }

    #[tokio::test]
    async fn test_required_engine_is_fatal() {
        let manager = unreachable_manager(true);
        let result = manager.initialize(&RetryPolicy::new(2, 0)).await;
        assert!(matches!(
            result,
            Err(Error::Connection {
                backend: BackendId::Search,
                attempts: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_disabled_search() {
        let manager = SearchIndexManager::new(&SearchConfig::disabled())
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert!(manager.initialize(&RetryPolicy::once()).await.is_ok());
        assert!(!manager.is_available());
        assert!(!manager.health_check().await.is_healthy());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = SearchIndexManager::new(&SearchConfig::at("::not a url"));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_url_segments_are_escaped() {
        let manager = SearchIndexManager::new(&SearchConfig::at("http://search:9200/"))
            .unwrap_or_else(|e| unreachable!("{e}"));
        let url = manager
            .url(&["deskstore_tickets", "_doc", "a/b c"])
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(
            url.as_str(),
            "http://search:9200/deskstore_tickets/_doc/a%2Fb%20c"
        );
    }

    #[test]
    fn test_parse_hits() {
        let response = json!({
            "took": 4,
            "hits": {
                "total": { "value": 2, "relation": "eq" },
                "hits": [
                    { "_index": "deskstore_tickets", "_id": "7", "_score": 2.5,
                      "_source": { "title": "Printer jam" },
                      "highlight": { "title": ["<em>Printer</em> jam"] } },
                    { "_index": "deskstore_assets", "_id": "A-1", "_score": null,
                      "_source": { "name": "Printer" } }
                ]
            }
        });
        let page = parse_hits(&response, "deskstore");
        assert_eq!(page.total, 2);
        assert_eq!(page.took_ms, Some(4));
        assert_eq!(page.items[0].family, Some(IndexFamily::Tickets));
        assert_eq!(page.items[0].score, Some(2.5));
        assert!(page.items[0].highlight.is_some());
        assert_eq!(page.items[1].family, Some(IndexFamily::Assets));
        assert_eq!(page.items[1].score, None);
    }

    #[test]
    fn test_parse_analytics() {
        let response = json!({
            "hits": { "total": { "value": 9 } },
            "aggregations": {
                "status": { "buckets": [ { "key": "open", "doc_count": 6 } ] },
                "created_per_day": { "buckets": [
                    { "key": 1_704_067_200_000_u64, "key_as_string": "2024-01-01", "doc_count": 3 }
                ] }
            }
        });
        let analytics = parse_analytics(&response);
        assert_eq!(analytics.total, 9);
        assert_eq!(analytics.buckets["status"][0].key, "open");
        assert_eq!(analytics.buckets["created_per_day"][0].key, "2024-01-01");
        assert_eq!(analytics.buckets["created_per_day"][0].doc_count, 3);
    }

    #[test]
    fn test_engine_error_extracts_reason() {
        let err = engine_error(
            "search_entities",
            "deskstore_tickets",
            StatusCode::BAD_REQUEST,
            r#"{"error":{"reason":"failed to parse query"}}"#,
        );
        assert!(err.to_string().contains("failed to parse query"));
    }
}
