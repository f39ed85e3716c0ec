use reqwest::Url;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use catalog_mirror::catalog::{fetch_detail, CatalogClient, CatalogError, CatalogService, DetailFetch};
use catalog_mirror::config::Auth;
use catalog_mirror::db::{self, Pool};
use catalog_mirror::model::{EntityKind, SyncCounts};
use catalog_mirror::sync::{SyncSettings, Synchronizer};

fn bearer(token: &str) -> Auth {
    Auth {
        header: "Authorization".into(),
        scheme: Some("Bearer".into()),
        token: token.into(),
    }
}

async fn setup_pool() -> Pool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn api_url(server: &MockServer, path: &str) -> Url {
    Url::parse(&format!("{}/api/{}", server.uri(), path)).unwrap()
}

#[tokio::test]
async fn get_sends_auth_and_reads_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/organizations"))
        .and(header("Authorization", "Bearer secret"))
        .and(header("Accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"o1\"")
                .insert_header("Link", "<https://elsewhere.test/p2>; rel=\"next\"")
                .set_body_json(json!([{"id": 1}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = CatalogClient::new(Some(bearer("secret")), None).unwrap();
    let res = client
        .get(&api_url(&server, "organizations"), None)
        .await
        .unwrap();

    assert_eq!(res.status, 200);
    assert_eq!(res.etag.as_deref(), Some("\"o1\""));
    assert_eq!(
        res.link.as_deref(),
        Some("<https://elsewhere.test/p2>; rel=\"next\"")
    );
    assert_eq!(res.body, Some(json!([{"id": 1}])));
}

#[tokio::test]
async fn conditional_get_yields_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/organizations/1"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/organizations/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_json(json!({"data": {"id": 1, "name": "Acme"}})),
        )
        .mount(&server)
        .await;

    let client = CatalogClient::new(None, None).unwrap();
    let url = api_url(&server, "organizations/1");

    match fetch_detail(&client, &url, None).await {
        DetailFetch::Fresh { body, validator } => {
            assert_eq!(body, json!({"id": 1, "name": "Acme"}));
            assert_eq!(validator.as_deref(), Some("\"v1\""));
        }
        other => panic!("expected fresh detail, got {:?}", other),
    }
    assert_eq!(
        fetch_detail(&client, &url, Some("\"v1\"")).await,
        DetailFetch::NotModified
    );
}

#[tokio::test]
async fn error_statuses_and_bad_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/broken"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let client = CatalogClient::new(None, None).unwrap();

    let res = client.get(&api_url(&server, "broken"), None).await.unwrap();
    assert_eq!(res.status, 503);
    assert!(!res.is_success());
    assert_eq!(res.body, None);

    let err = client
        .get(&api_url(&server, "garbled"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Decode { .. }), "{:?}", err);

    assert!(matches!(
        fetch_detail(&client, &api_url(&server, "garbled"), None).await,
        DetailFetch::Failed(_)
    ));
}

#[tokio::test]
async fn sync_over_http_follows_links_and_revalidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/organizations"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "Link",
                    format!("<{}/api/organizations-page-2>; rel=\"next\"", server.uri()).as_str(),
                )
                .set_body_json(json!([{"id": 1, "name": "Acme"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/organizations-page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": 2, "name": "Globex"}],
            "links": {"next": null}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/organizations/1"))
        .and(header("If-None-Match", "\"acme-1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/organizations/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"acme-1\"")
                .set_body_json(json!({"id": 1, "name": "Acme Inc", "website": "https://acme.test"})),
        )
        .mount(&server)
        .await;

    let pool = setup_pool().await;
    let client = CatalogClient::new(None, None).unwrap();
    let base = Url::parse(&format!("{}/api/", server.uri())).unwrap();
    let sync = Synchronizer::new(pool.clone(), client, SyncSettings::new(Some(base)));

    let first = sync.run_once(EntityKind::Organization).await;
    assert_eq!(
        first,
        SyncCounts {
            imported: 2,
            updated: 0,
            skipped: 0
        }
    );
    let acme = db::find_entity_by_external_id(&pool, EntityKind::Organization, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acme.field("name").as_text(), Some("Acme Inc"));
    assert_eq!(acme.field("website").as_text(), Some("https://acme.test"));
    // No detail mock for Globex: the list fields were stored.
    let globex = db::find_entity_by_external_id(&pool, EntityKind::Organization, 2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(globex.field("name").as_text(), Some("Globex"));

    let second = sync.run_once(EntityKind::Organization).await;
    assert_eq!(
        second,
        SyncCounts {
            imported: 0,
            updated: 0,
            skipped: 2
        }
    );

    let revalidations = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.headers.get("If-None-Match").is_some())
        .count();
    assert_eq!(revalidations, 1);
}
