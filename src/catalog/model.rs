use reqwest::Url;
use serde_json::Value;

/// What the engine needs from one HTTP exchange with the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Raw `Link` header, if any.
    pub link: Option<String>,
    /// `ETag` header, used as the cache validator.
    pub etag: Option<String>,
    /// Decoded JSON body; absent for 304 and empty bodies.
    pub body: Option<Value>,
}

impl RawResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
            ..Default::default()
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Result of a conditional detail fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailFetch {
    /// 2xx with a body; `validator` is the new cache validator, if sent.
    Fresh {
        body: Value,
        validator: Option<String>,
    },
    /// The stored validator still matches.
    NotModified,
    /// Any other status or a transport error.
    Failed(String),
}

/// Which list envelope a page used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageShape {
    /// Bare array; next page from the `Link` header.
    Array,
    /// `{ "data": [...], "next" | "links": { "next" } }`.
    Data,
    /// `{ "items": [...], "links": { "next" } }`.
    Items,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub shape: PageShape,
    pub items: Vec<Value>,
    pub next: Option<Url>,
}
