// Broker source module - fetches raw payloads from the RabbitMQ management API
//
// A BrokerSource is one configured node. The scheduler only sees the trait, so
// the HTTP implementation can be swapped for in-memory sources in tests.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::config::NodeConfig;

/// Management API resources the exporter reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Aggregate object counts (`object_totals`) and the node name
    Overview,

    /// One entry per queue, including its message depth
    Queues,
}

impl Resource {
    pub fn path(self) -> &'static str {
        match self {
            Resource::Overview => "/api/overview",
            Resource::Queues => "/api/queues",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Errors that can occur while fetching a resource
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {resource} failed: {source}")]
    RequestError {
        resource: Resource,
        #[source]
        source: reqwest::Error,
    },

    #[error("{resource} returned HTTP {status}")]
    StatusError {
        resource: Resource,
        status: reqwest::StatusCode,
    },

    #[error("{resource} returned malformed JSON: {source}")]
    DecodeError {
        resource: Resource,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn resource(&self) -> Resource {
        match self {
            FetchError::RequestError { resource, .. }
            | FetchError::StatusError { resource, .. }
            | FetchError::DecodeError { resource, .. } => *resource,
        }
    }
}

/// A broker node that can be polled for management API payloads
#[async_trait]
pub trait BrokerSource: Send + Sync {
    /// Configured name of the node, used for logging only
    fn name(&self) -> &str;

    /// Fetches one resource and returns its decoded JSON body
    ///
    /// No schema validation happens here; that is the extractor's job.
    async fn fetch(&self, resource: Resource) -> Result<Value, FetchError>;
}

/// BrokerSource backed by the management plugin's HTTP API
///
/// Requests carry basic auth credentials. No timeout is set beyond the
/// transport default, so a hung broker stalls only its own poll loop.
pub struct HttpBrokerSource {
    /// Shared HTTP client (connection pool is reused across nodes)
    client: Client,

    name: String,

    /// Base URL without a trailing slash
    base_url: String,

    username: String,
    password: String,
}

impl HttpBrokerSource {
    /// Creates a source for a configured node
    ///
    /// # Arguments
    /// * `client` - HTTP client shared by all nodes
    /// * `node` - Node descriptor from the configuration file
    pub fn new(client: Client, node: &NodeConfig) -> Self {
        HttpBrokerSource {
            client,
            name: node.name.clone(),
            base_url: node.url.trim_end_matches('/').to_string(),
            username: node.uname.clone(),
            password: node.password.clone(),
        }
    }

    fn url(&self, resource: Resource) -> String {
        format!("{}{}", self.base_url, resource.path())
    }
}

#[async_trait]
impl BrokerSource for HttpBrokerSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, resource: Resource) -> Result<Value, FetchError> {
        let url = self.url(resource);
        debug!("Fetching {} for node '{}'", resource, self.name);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|source| FetchError::RequestError { resource, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::StatusError { resource, status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::RequestError { resource, source })?;

        debug!(
            "Received {} bytes from {} for node '{}'",
            body.len(),
            resource,
            self.name
        );

        serde_json::from_slice(&body).map_err(|source| FetchError::DecodeError { resource, source })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// "guest:guest" in base64
    const GUEST_AUTH: &str = "Basic Z3Vlc3Q6Z3Vlc3Q=";

    /// Serves a fake management API on an ephemeral local port
    pub(crate) async fn spawn_fake_broker(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    pub(crate) fn node_config(addr: SocketAddr) -> NodeConfig {
        NodeConfig {
            name: "test-node".to_string(),
            url: format!("http://{}/", addr),
            uname: "guest".to_string(),
            password: "guest".to_string(),
            interval: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_basic_auth() {
        let router = Router::new().route(
            "/api/overview",
            get(|headers: HeaderMap| async move {
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some(GUEST_AUTH) => Json(json!({"node": "rabbit@host1"})).into_response(),
                    _ => StatusCode::UNAUTHORIZED.into_response(),
                }
            }),
        );
        let addr = spawn_fake_broker(router).await;
        let source = HttpBrokerSource::new(Client::new(), &node_config(addr));

        let body = source.fetch(Resource::Overview).await.unwrap();

        assert_eq!(body, json!({"node": "rabbit@host1"}));
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let router = Router::new().route(
            "/api/queues",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let addr = spawn_fake_broker(router).await;
        let source = HttpBrokerSource::new(Client::new(), &node_config(addr));

        let error = source.fetch(Resource::Queues).await.unwrap_err();

        assert!(matches!(
            error,
            FetchError::StatusError { resource: Resource::Queues, status }
                if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn test_fetch_malformed_json() {
        let router = Router::new().route("/api/overview", get(|| async { "not json" }));
        let addr = spawn_fake_broker(router).await;
        let source = HttpBrokerSource::new(Client::new(), &node_config(addr));

        let error = source.fetch(Resource::Overview).await.unwrap_err();

        assert!(matches!(error, FetchError::DecodeError { .. }));
        assert_eq!(error.resource(), Resource::Overview);
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let source = HttpBrokerSource::new(Client::new(), &node_config(addr));

        let error = source.fetch(Resource::Overview).await.unwrap_err();

        assert!(matches!(error, FetchError::RequestError { .. }));
    }
}
