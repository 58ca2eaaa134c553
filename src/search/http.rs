//! Blocking HTTP transport to an Elasticsearch cluster.

use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, error, info};

use super::{SearchClient, SearchError, SearchResult};
use crate::config::ConnectionConfig;

/// Connection to one Elasticsearch endpoint.
pub struct ElasticClient {
    http: Client,
    base_url: String,
    user: String,
    password: String,
    timeout: Duration,
}

impl ElasticClient {
    /// Builds the HTTP client. No request is sent yet.
    pub fn new(config: &ConnectionConfig) -> Result<Self, SearchError> {
        let scheme = if config.ssl { "https" } else { "http" };
        let base_url = format!("{}://{}:{}", scheme, config.host, config.port);
        debug!(
            url = %base_url,
            user = %config.user,
            password = "*",
            validate_ssl = config.validate_ssl,
            proxy = %config.proxy,
            socks = config.socks,
            "Create connection"
        );

        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!config.validate_ssl)
            .danger_accept_invalid_hostnames(!config.validate_ssl)
            .build()
            .map_err(|e| SearchError::Connection(format!("TLS setup failed: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .use_preconfigured_tls(tls);

        if !config.proxy.is_empty() {
            let proxy_url = if config.socks && !config.proxy.contains("://") {
                format!("socks5://{}", config.proxy)
            } else {
                config.proxy.clone()
            };
            let proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| SearchError::Connection(format!("invalid proxy '{}': {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build().map_err(|e| {
            error!(error = %e, "Failed to create connection");
            SearchError::Connection(e.to_string())
        })?;

        Ok(Self {
            http,
            base_url,
            user: config.user.clone(),
            password: config.password.clone(),
            timeout: config.timeout,
        })
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        let request = self.http.request(method, url);
        if self.user.is_empty() {
            request
        } else {
            request.basic_auth(&self.user, Some(&self.password))
        }
    }

    fn send(&self, method: Method, endpoint: &str, body: &[u8]) -> Result<String, SearchError> {
        let response = self
            .request(method.clone(), endpoint)
            .body(body.to_vec())
            .send()
            .map_err(|e| {
                error!(method = %method, endpoint, error = %e, "Request failed");
                SearchError::Connection(e.to_string())
            })?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| SearchError::Connection(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let reason = backend_reason(&text).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });
            error!(method = %method, endpoint, status = status.as_u16(), reason = %reason, "Backend returned an error");
            return Err(SearchError::Backend {
                status: status.as_u16(),
                reason,
            });
        }
        Ok(text)
    }
}

/// Extracts `error.reason` from an error body; some endpoints return `error` as a plain string.
fn backend_reason(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::String(s) => Some(s.clone()),
        obj => obj.get("reason").and_then(Value::as_str).map(str::to_string),
    }
}

impl SearchClient for ElasticClient {
    fn search(&self, index: &str, query: &str) -> Result<SearchResult, SearchError> {
        let endpoint = if index.is_empty() {
            "/_search".to_string()
        } else {
            format!("/{}/_search", index)
        };
        debug!(endpoint = %endpoint, query, "Execute query");

        let text = self.send(Method::POST, &endpoint, query.as_bytes())?;
        let result: SearchResult =
            serde_json::from_str(&text).map_err(|e| SearchError::Decode(e.to_string()))?;

        info!(endpoint = %endpoint, took = result.took, hits = result.hit_count(), "Executed query");
        Ok(result)
    }

    fn post_json(&self, endpoint: &str, body: &[u8]) -> Result<Value, SearchError> {
        let text = self.send(Method::POST, endpoint, body)?;
        serde_json::from_str(&text).map_err(|e| SearchError::Decode(e.to_string()))
    }

    fn delete_json(&self, endpoint: &str, body: &[u8]) -> Result<Value, SearchError> {
        let text = self.send(Method::DELETE, endpoint, body)?;
        serde_json::from_str(&text).map_err(|e| SearchError::Decode(e.to_string()))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
