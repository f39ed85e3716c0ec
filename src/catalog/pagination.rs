//! Paginated list fetching.
//!
//! List endpoints answer in one of three shapes:
//! - a bare array, with the next page in a `Link: <url>; rel="next"` header
//! - `{ "data": [...], "next": url }` or `{ "data": [...], "links": { "next": url } }`
//! - `{ "items": [...], "links": { "next": url } }`
//!
//! Iteration stops at the first page without a next pointer, on a next
//! pointer back to a page already listed, on any non-2xx response and on any
//! other body shape.

use futures::stream::{self, BoxStream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, error, warn};

use super::model::{Page, PageShape, RawResponse};
use super::CatalogService;

static LINK_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^>]*)>([^,<]*)").expect("valid link entry regex"));

static REL_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\brel\s*=\s*(?:"([^"]*)"|([^\s;,]+))"#).expect("valid rel regex")
});

/// Target of the `rel="next"` entry of a web-linking header, if any.
pub fn next_from_link_header(header: &str) -> Option<String> {
    LINK_ENTRY.captures_iter(header).find_map(|entry| {
        let target = entry.get(1)?.as_str().trim();
        let params = entry.get(2).map_or("", |m| m.as_str());
        let rel = REL_PARAM.captures(params)?;
        let rel_value = rel.get(1).or_else(|| rel.get(2))?.as_str();
        rel_value
            .split_whitespace()
            .any(|r| r.eq_ignore_ascii_case("next"))
            .then(|| target.to_string())
    })
}

fn string_at<'v>(map: &'v Map<String, Value>, key: &str) -> Option<&'v str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn links_next(map: &Map<String, Value>) -> Option<&str> {
    map.get("links")
        .and_then(Value::as_object)
        .and_then(|links| string_at(links, "next"))
}

/// Interpret one list response. Returns `None` for an unrecognised body.
pub fn interpret_page(url: &Url, res: RawResponse) -> Option<Page> {
    let (shape, items, next) = match res.body? {
        Value::Array(items) => {
            let next = res.link.as_deref().and_then(next_from_link_header);
            (PageShape::Array, items, next)
        }
        Value::Object(mut map) => {
            if map.get("data").is_some_and(Value::is_array) {
                let next = string_at(&map, "next")
                    .or_else(|| links_next(&map))
                    .map(str::to_string);
                let Some(Value::Array(items)) = map.remove("data") else {
                    return None;
                };
                (PageShape::Data, items, next)
            } else if map.get("items").is_some_and(Value::is_array) {
                let next = links_next(&map).map(str::to_string);
                let Some(Value::Array(items)) = map.remove("items") else {
                    return None;
                };
                (PageShape::Items, items, next)
            } else {
                return None;
            }
        }
        _ => return None,
    };

    let next = next.and_then(|raw| match url.join(&raw) {
        Ok(next) if next == *url => {
            warn!(%url, "next page points at the current page; stopping");
            None
        }
        Ok(next) => Some(next),
        Err(err) => {
            warn!(%url, next = %raw, ?err, "unparsable next page URL; stopping");
            None
        }
    });
    Some(Page { shape, items, next })
}

/// Fetch and interpret one list page. Failures are logged and end the listing.
pub async fn fetch_page(api: &dyn CatalogService, url: &Url) -> Option<Page> {
    let res = match api.get(url, None).await {
        Ok(res) => res,
        Err(err) => {
            error!(%url, ?err, "list fetch failed");
            return None;
        }
    };
    if !res.is_success() {
        error!(%url, status = res.status, "list fetch returned an error status");
        return None;
    }
    let page = interpret_page(url, res);
    match &page {
        Some(page) => debug!(%url, shape = ?page.shape, items = page.items.len(), "list page"),
        None => warn!(%url, "unrecognised list response shape; stopping"),
    }
    page
}

/// Lazily yield every item of a paginated list starting at `start`. The next
/// page is requested only once the current one has been consumed. A next
/// pointer to a page already visited ends the listing.
pub fn list_items<'a>(api: &'a dyn CatalogService, start: Url) -> BoxStream<'a, Value> {
    let state = (Some(start), HashSet::new());
    stream::unfold(state, move |(cursor, mut visited)| async move {
        let url = cursor?;
        visited.insert(url.clone());
        let page = fetch_page(api, &url).await?;
        let next = page.next.filter(|next| {
            let seen = visited.contains(next);
            if seen {
                warn!(%url, %next, "next page was already visited; stopping");
            }
            !seen
        });
        Some((stream::iter(page.items), (next, visited)))
    })
    .flatten()
    .boxed()
}
