use async_trait::async_trait;
use reqwest::header::{HeaderName, ETAG, IF_NONE_MATCH, LINK};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::config::{Auth, Config};

pub mod model;
pub mod pagination;

pub use model::{DetailFetch, Page, PageShape, RawResponse};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid auth header: {0}")]
    InvalidHeader(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// The remote catalog as seen by the sync engine: a conditional GET.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// GET `url`, sending `validator` as `If-None-Match` when present.
    async fn get(&self, url: &Url, validator: Option<&str>) -> Result<RawResponse, CatalogError>;
}

#[derive(Clone)]
pub struct CatalogClient {
    http: Client,
    auth: Option<Auth>,
}

impl fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogClient")
            .field("auth_header", &self.auth.as_ref().map(|a| a.header.as_str()))
            .finish_non_exhaustive()
    }
}

impl CatalogClient {
    pub fn new(auth: Option<Auth>, timeout: Option<std::time::Duration>) -> Result<Self, CatalogError> {
        let mut builder = Client::builder()
            .user_agent(concat!("catalog-mirror/", env!("CARGO_PKG_VERSION")))
            .no_proxy();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(CatalogError::Client)?;
        Ok(Self { http, auth })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, CatalogError> {
        Self::new(cfg.catalog.auth.clone(), cfg.timeout())
    }

    pub fn build_request(
        &self,
        url: &Url,
        validator: Option<&str>,
    ) -> Result<reqwest::Request, CatalogError> {
        let mut request = self
            .http
            .get(url.clone())
            .header("Accept", "application/json");
        if let Some(auth) = &self.auth {
            request = request.header(auth.header.as_str(), auth.header_value());
        }
        if let Some(validator) = validator {
            request = request.header(IF_NONE_MATCH, validator);
        }
        request
            .build()
            .map_err(|_| CatalogError::InvalidHeader(format!("{:?}", self.auth)))
    }
}

#[async_trait]
impl CatalogService for CatalogClient {
    async fn get(&self, url: &Url, validator: Option<&str>) -> Result<RawResponse, CatalogError> {
        let request = self.build_request(url, validator)?;
        debug!(%url, conditional = validator.is_some(), "catalog request");

        let res = self
            .http
            .execute(request)
            .await
            .map_err(|source| CatalogError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = res.status();
        let header = |name: HeaderName| {
            res.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let link = header(LINK);
        let etag = header(ETAG);
        debug!(%url, status = status.as_u16(), "catalog response");

        if status == StatusCode::NOT_MODIFIED {
            return Ok(RawResponse {
                status: status.as_u16(),
                link,
                etag,
                body: None,
            });
        }

        let bytes = res.bytes().await.map_err(|source| CatalogError::Request {
            url: url.to_string(),
            source,
        })?;
        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            None
        } else if status.is_success() {
            let value: Value =
                serde_json::from_slice(&bytes).map_err(|source| CatalogError::Decode {
                    url: url.to_string(),
                    source,
                })?;
            Some(value)
        } else {
            // Error bodies are only informative.
            serde_json::from_slice(&bytes).ok()
        };

        Ok(RawResponse {
            status: status.as_u16(),
            link,
            etag,
            body,
        })
    }
}

/// Fetch a detail resource conditionally. Never fails: transport errors and
/// unexpected statuses come back as [`DetailFetch::Failed`].
pub async fn fetch_detail(
    api: &dyn CatalogService,
    url: &Url,
    validator: Option<&str>,
) -> DetailFetch {
    let res = match api.get(url, validator).await {
        Ok(res) => res,
        Err(err) => return DetailFetch::Failed(err.to_string()),
    };
    if res.is_not_modified() {
        return DetailFetch::NotModified;
    }
    if !res.is_success() {
        return DetailFetch::Failed(format!("status {}", res.status));
    }
    match res.body {
        Some(body) => DetailFetch::Fresh {
            body: unwrap_envelope(body),
            validator: res.etag,
        },
        None => DetailFetch::Failed(format!("status {} without a body", res.status)),
    }
}

/// Detail endpoints sometimes wrap the record as `{ "data": { ... } }`.
fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_request_sets_headers() {
        let auth = Auth {
            header: "X-Api-Key".into(),
            scheme: None,
            token: "token".into(),
        };
        let client = CatalogClient::new(Some(auth), None).unwrap();
        let url = Url::parse("https://catalog.test/api/organizations/7").unwrap();
        let request = client.build_request(&url, Some("\"abc\"")).unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/api/organizations/7");
        let headers = request.headers();
        assert_eq!(
            headers.get("X-Api-Key").and_then(|h| h.to_str().ok()).unwrap(),
            "token"
        );
        assert_eq!(
            headers.get(IF_NONE_MATCH).and_then(|h| h.to_str().ok()).unwrap(),
            "\"abc\""
        );
    }

    #[test]
    fn build_request_without_auth_or_validator() {
        let client = CatalogClient::new(None, None).unwrap();
        let url = Url::parse("https://catalog.test/api/organizations").unwrap();
        let request = client.build_request(&url, None).unwrap();
        assert!(request.headers().get("Authorization").is_none());
        assert!(request.headers().get(IF_NONE_MATCH).is_none());
    }

    #[test]
    fn unwrap_envelope_only_unwraps_objects() {
        assert_eq!(
            unwrap_envelope(json!({"data": {"id": 1}})),
            json!({"id": 1})
        );
        assert_eq!(
            unwrap_envelope(json!({"id": 1, "data": [1, 2]})),
            json!({"id": 1, "data": [1, 2]})
        );
    }
}
