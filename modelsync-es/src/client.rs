//! [`SearchEngine`] over the Elasticsearch REST API.
//!
//! Every connection maps to one index holding all of its doc types. Requests
//! go to the host that answered last and fail over to the next configured
//! host on connect errors and timeouts.

use async_trait::async_trait;
use modelsync::analysis::AnalysisSettings;
use modelsync::config::ConnectionConfig;
use modelsync::engine::EngineResult;
use modelsync::schema::MappingPayload;
use modelsync::{BulkItem, BulkResponse, ConnectionRegistry, SearchEngine};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EsError, Result};
use crate::wire::{self, EsBulkResponse};

enum Body {
    Json(Value),
    Ndjson(String),
}

struct Node {
    name: String,
    config: ConnectionConfig,
    client: reqwest::Client,
    /// Position in `config.hosts` of the host that answered last
    preferred: AtomicUsize,
}

pub struct EsEngine {
    nodes: BTreeMap<String, Node>,
}

impl EsEngine {
    pub fn new(connections: &ConnectionRegistry) -> Result<Self> {
        let nodes = connections
            .iter()
            .map(|(name, config)| Ok((name.to_string(), Node::new(name, config.clone())?)))
            .collect::<Result<_>>()?;
        Ok(Self { nodes })
    }

    fn node(&self, connection: &str) -> Result<&Node> {
        self.nodes
            .get(connection)
            .ok_or_else(|| EsError::UnknownConnection(connection.to_string()))
    }
}

fn join_url(host: &str, path: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'))
}

impl Node {
    fn new(name: &str, config: ConnectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            name: name.to_string(),
            config,
            client,
            preferred: AtomicUsize::new(0),
        })
    }

    fn index(&self) -> &str {
        &self.config.index_name
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Body>) -> Result<reqwest::Response> {
        let hosts = &self.config.hosts;
        let start = self.preferred.load(Ordering::Relaxed);
        let mut last_error = String::from("no hosts configured");

        for offset in 0..hosts.len() {
            let position = (start + offset) % hosts.len();
            let host = &hosts[position];
            let mut request = self.client.request(method.clone(), join_url(host, path));
            if let Some(username) = &self.config.username {
                request = request.basic_auth(username, self.config.password.as_ref());
            }
            request = match body {
                Some(Body::Json(value)) => request.json(value),
                Some(Body::Ndjson(text)) => request
                    .header(CONTENT_TYPE, "application/x-ndjson")
                    .body(text.clone()),
                None => request,
            };

            match request.send().await {
                Ok(response) => {
                    self.preferred.store(position, Ordering::Relaxed);
                    return Ok(response);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(connection = %self.name, host = %host, error = %e, "Host did not answer");
                    last_error = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EsError::Unreachable {
            connection: self.name.clone(),
            reason: last_error,
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Body>) -> Result<Value> {
        let response = self.send(method, path, body).await?;
        read_json(response, path).await
    }

    async fn index_exists(&self) -> Result<bool> {
        let response = self.send(Method::HEAD, self.index(), None).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(EsError::Status {
                status: status.as_u16(),
                reason: format!("HEAD {}", self.index()),
            }),
        }
    }

    async fn create_mapping(&self, payload: &MappingPayload) -> Result<()> {
        if !self.index_exists().await? {
            let body = Body::Json(wire::create_index_body(&payload.analysis));
            match self.call(Method::PUT, self.index(), Some(&body)).await {
                Ok(_) => info!(connection = %self.name, index = %self.index(), "Created index"),
                // another process created it in the meantime
                Err(EsError::Status { status: 400, reason })
                    if reason.contains("already_exists") => {}
                Err(e) => return Err(e),
            }
        }

        let path = format!("{}/_mapping/{}", self.index(), payload.doc_type);
        self.call(Method::PUT, &path, Some(&Body::Json(payload.mapping.clone())))
            .await?;
        debug!(connection = %self.name, doc_type = %payload.doc_type, "Put mapping");
        Ok(())
    }

    async fn delete_mapping(&self, doc_type: &str) -> Result<()> {
        let path = format!("{}/_mapping/{}", self.index(), doc_type);
        match self.call(Method::DELETE, &path, None).await {
            Ok(_) | Err(EsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn bulk(&self, items: Vec<BulkItem>) -> Result<BulkResponse> {
        if items.is_empty() {
            return Ok(BulkResponse::default());
        }
        let body = Body::Ndjson(wire::bulk_body(self.index(), &items)?);
        let path = if self.config.refresh {
            "_bulk?refresh=true"
        } else {
            "_bulk"
        };

        let value = self.call(Method::POST, path, Some(&body)).await?;
        let parsed: EsBulkResponse = serde_json::from_value(value)?;
        if parsed.items.len() != items.len() {
            return Err(EsError::Response(format!(
                "bulk answered {} items for {} sent",
                parsed.items.len(),
                items.len()
            )));
        }
        debug!(connection = %self.name, items = items.len(), took_ms = parsed.took, "Bulk request");
        parsed.into_engine_response()
    }

    async fn get_current_mapping(&self, doc_type: &str) -> Result<Option<Value>> {
        let path = format!("{}/_mapping/{}", self.index(), doc_type);
        match self.call(Method::GET, &path, None).await {
            Ok(response) => Ok(wire::extract_mapping(&response, doc_type)),
            Err(EsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_analysis(&self) -> Result<Option<AnalysisSettings>> {
        let path = format!("{}/_settings", self.index());
        match self.call(Method::GET, &path, None).await {
            Ok(response) => wire::extract_analysis(&response).map(Some),
            Err(EsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Analysis settings can only change on a closed index. The index is
    /// reopened even when the update fails.
    async fn update_analysis(&self, settings: &AnalysisSettings) -> Result<()> {
        let index = self.index();
        self.call(Method::POST, &format!("{index}/_close"), None).await?;

        let body = Body::Json(json!({ "analysis": settings.to_value() }));
        let updated = self
            .call(Method::PUT, &format!("{index}/_settings"), Some(&body))
            .await;
        let reopened = self.call(Method::POST, &format!("{index}/_open"), None).await;

        updated?;
        reopened?;
        info!(connection = %self.name, index = %index, "Updated analysis settings");
        Ok(())
    }
}

async fn read_json(response: reqwest::Response, what: &str) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    if status.is_success() {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        return Ok(serde_json::from_str(&text)?);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(EsError::NotFound(what.to_string()));
    }
    Err(EsError::Status {
        status: status.as_u16(),
        reason: wire::body_reason(&text),
    })
}

#[async_trait]
impl SearchEngine for EsEngine {
    async fn create_mapping(&self, connection: &str, payload: &MappingPayload) -> EngineResult<()> {
        Ok(self.node(connection)?.create_mapping(payload).await?)
    }

    async fn delete_mapping(&self, connection: &str, doc_type: &str) -> EngineResult<()> {
        Ok(self.node(connection)?.delete_mapping(doc_type).await?)
    }

    async fn bulk(&self, connection: &str, items: Vec<BulkItem>) -> EngineResult<BulkResponse> {
        Ok(self.node(connection)?.bulk(items).await?)
    }

    async fn get_current_mapping(&self, connection: &str, doc_type: &str) -> EngineResult<Option<Value>> {
        Ok(self.node(connection)?.get_current_mapping(doc_type).await?)
    }

    async fn get_analysis(&self, connection: &str) -> EngineResult<Option<AnalysisSettings>> {
        Ok(self.node(connection)?.get_analysis().await?)
    }

    async fn update_analysis(&self, connection: &str, settings: &AnalysisSettings) -> EngineResult<()> {
        Ok(self.node(connection)?.update_analysis(settings).await?)
    }
}
