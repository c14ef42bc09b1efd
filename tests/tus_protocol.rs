//! End-to-end tests through the axum router

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tower::ServiceExt;

use tus_server::config::{Config, TusConfig};
use tus_server::routes;
use tus_server::state::AppState;
use tus_server::store::{InMemoryStore, StoreCapabilities};
use tus_server::tus::ExpirationPolicy;

fn app_with(tus: TusConfig) -> Router {
    let config = Config {
        tus,
        ..Config::default()
    };
    let store = StoreCapabilities::full(Arc::new(InMemoryStore::new()));
    routes::app(AppState::new(config, store))
}

fn app() -> Router {
    app_with(TusConfig::default())
}

fn tus_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Tus-Resumable", "1.0.0")
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

async fn create(app: &Router, length: u64) -> String {
    let response = app
        .clone()
        .oneshot(
            tus_request("POST", "/files")
                .header("Upload-Length", length.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    header(&response, "location").unwrap().to_string()
}

async fn patch(app: &Router, location: &str, offset: u64, data: &'static [u8]) -> Response {
    app.clone()
        .oneshot(
            tus_request("PATCH", location)
                .header("Content-Type", "application/offset+octet-stream")
                .header("Upload-Offset", offset.to_string())
                .body(Body::from(data))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "tus-server");
}

#[tokio::test]
async fn test_options_without_tus_resumable() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/files")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "tus-version"), Some("1.0.0"));
    assert!(header(&response, "tus-extension")
        .unwrap()
        .contains("creation"));
}

#[tokio::test]
async fn test_upload_lifecycle() {
    let app = app();
    let location = create(&app, 11).await;
    assert!(location.starts_with("/files/"));

    let first = patch(&app, &location, 0, b"hello ").await;
    assert_eq!(first.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&first, "upload-offset"), Some("6"));
    assert_eq!(header(&first, "tus-resumable"), Some("1.0.0"));

    let head = app
        .clone()
        .oneshot(tus_request("HEAD", &location).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(header(&head, "upload-offset"), Some("6"));
    assert_eq!(header(&head, "upload-length"), Some("11"));

    let second = patch(&app, &location, 6, b"world").await;
    assert_eq!(second.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&second, "upload-offset"), Some("11"));

    let deleted = app
        .clone()
        .oneshot(tus_request("DELETE", &location).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = app
        .oneshot(tus_request("HEAD", &location).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_method_override() {
    let app = app();
    let location = create(&app, 3).await;

    let response = app
        .clone()
        .oneshot(
            tus_request("POST", &location)
                .header("X-HTTP-Method-Override", "PATCH")
                .header("Content-Type", "application/offset+octet-stream")
                .header("Upload-Offset", "0")
                .body(Body::from("abc"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "upload-offset"), Some("3"));
}

#[tokio::test]
async fn test_missing_tus_resumable() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/files")
                .header("Upload-Length", "10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(header(&response, "tus-version"), Some("1.0.0"));
}

#[tokio::test]
async fn test_offset_conflict() {
    let app = app();
    let location = create(&app, 10).await;
    patch(&app, &location, 0, b"abc").await;

    let response = patch(&app, &location, 0, b"abc").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_expiration_header_on_create() {
    let app = app_with(TusConfig {
        expiration: ExpirationPolicy::absolute_secs(600),
        ..TusConfig::default()
    });

    let response = app
        .oneshot(
            tus_request("POST", "/files")
                .header("Upload-Length", "10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let expires = header(&response, "upload-expires").unwrap();
    assert!(expires.ends_with(" GMT"));
    assert!(tus_server::tus::http_date::parse_http_date(expires).is_ok());
}

#[tokio::test]
async fn test_custom_url_path() {
    let app = app_with(TusConfig {
        url_path: "/uploads".to_string(),
        ..TusConfig::default()
    });

    let response = app
        .clone()
        .oneshot(
            tus_request("POST", "/uploads/")
                .header("Upload-Length", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(header(&response, "location").unwrap().starts_with("/uploads/"));

    let missing = app
        .oneshot(tus_request("HEAD", "/files/abc").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
