use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use glance_core::guard::PathGuard;
use glance_core::service::{DiffService, ServiceLimits};
use glance_core::sources::{CannedSource, SourceError};
use glance_core::token::{self, Secret, TokenCodec};
use glance_server::{cors_layer, router, with_viewer};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "http-test-secret-0123456789abcdefgh";
const ORIGIN: &str = "https://web.telegram.org";

struct Harness {
    _temp: TempDir,
    root: PathBuf,
    service: DiffService,
}

impl Harness {
    fn new(source: CannedSource) -> Self {
        Self::with_limits(source, ServiceLimits::default())
    }

    fn with_limits(source: CannedSource, limits: ServiceLimits) -> Self {
        let temp = TempDir::new().expect("tempdir");
        let root = fs::canonicalize(temp.path()).expect("canonical root");
        let proj = root.join("proj");
        fs::create_dir(&proj).expect("create proj");
        git2::Repository::init(&proj).expect("init proj");

        let service = DiffService::with_limits(
            TokenCodec::new(Secret::new(SECRET)),
            PathGuard::new([root.clone()]),
            Arc::new(source),
            limits,
        );
        Self {
            _temp: temp,
            root,
            service,
        }
    }

    fn app(&self) -> Router {
        router(
            self.service.clone(),
            cors_layer(&[ORIGIN.to_owned()]).expect("cors"),
        )
    }

    fn token(&self) -> String {
        self.service
            .issue_token(self.root.join("proj"))
            .expect("token")
    }
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get_text(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn diff_endpoint_returns_json_result() {
    let harness = Harness::new(CannedSource::with_diff("main", "+added\n"));
    let uri = format!("/api/diff/{}", harness.token());

    let (status, json) = get(harness.app(), &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["diff"], "+added\n");
    assert_eq!(json["branch"], "main");
    assert_eq!(json["repository_path"], "~/proj");
    assert_eq!(json["truncated"], false);
    assert_eq!(json["has_changes"], true);
}

#[tokio::test]
async fn clean_tree_returns_sentinel() {
    let harness = Harness::new(CannedSource::no_changes("main"));
    let uri = format!("/api/diff/{}", harness.token());

    let (status, json) = get(harness.app(), &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["diff"], "No changes to show");
    assert_eq!(json["has_changes"], false);
}

#[tokio::test]
async fn bad_token_is_unauthorized_with_generic_body() {
    let harness = Harness::new(CannedSource::no_changes("main"));

    let (status, json) = get(harness.app(), "/api/diff/not-a-token").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "token_malformed");
    assert_eq!(json["error"], "invalid token");
}

#[tokio::test]
async fn forged_token_is_unauthorized() {
    let harness = Harness::new(CannedSource::no_changes("main"));
    let proj = harness.root.join("proj");
    let forged = TokenCodec::new(Secret::new("some-other-secret-0123456789abcdef"))
        .issue(camino::Utf8Path::from_path(&proj).expect("utf-8"))
        .expect("forged");

    let (status, json) = get(harness.app(), &format!("/api/diff/{forged}")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "token_signature_mismatch");
}

#[tokio::test]
async fn signed_token_for_repository_outside_roots_is_forbidden() {
    let harness = Harness::new(CannedSource::with_diff("main", "+secret\n"));
    let outside = TempDir::new().expect("outside tempdir");
    let repo = fs::canonicalize(outside.path()).expect("canonical outside");
    git2::Repository::init(&repo).expect("init outside");
    let token = token::issue(
        camino::Utf8Path::from_path(&repo).expect("utf-8"),
        &Secret::new(SECRET),
        Duration::from_secs(60),
    )
    .expect("token");

    let (status, json) = get(harness.app(), &format!("/api/diff/{token}")).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "path_not_allowed");
    assert!(!json.to_string().contains("secret"));
}

#[tokio::test]
async fn removed_repository_is_not_found() {
    let harness = Harness::new(CannedSource::no_changes("main"));
    let token = harness.token();
    fs::remove_dir_all(harness.root.join("proj")).expect("remove proj");

    let (status, json) = get(harness.app(), &format!("/api/diff/{token}")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "not_a_repository");
}

#[tokio::test]
async fn failures_do_not_leak_detail() {
    let harness = Harness::new(CannedSource::failing(SourceError::failure(
        "git exited with status 128: fatal: /srv/secret/path",
    )));
    let uri = format!("/api/diff/{}", harness.token());

    let (status, json) = get(harness.app(), &uri).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "diff failed");
    assert!(!json.to_string().contains("/srv/secret"));
}

#[tokio::test]
async fn timeout_maps_to_gateway_timeout() {
    let harness = Harness::new(CannedSource::failing(SourceError::OperationTimeout {
        after: Duration::from_secs(10),
    }));
    let uri = format!("/api/diff/{}", harness.token());

    let (status, json) = get(harness.app(), &uri).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["code"], "operation_timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn saturated_server_answers_service_unavailable() {
    let harness = Harness::with_limits(
        CannedSource::no_changes("main").delayed(Duration::from_millis(1000)),
        ServiceLimits {
            max_concurrent: 1,
            admission_wait: Duration::from_millis(100),
        },
    );
    let uri = format!("/api/diff/{}", harness.token());

    let first = {
        let app = harness.app();
        let uri = uri.clone();
        tokio::spawn(async move { get(app, &uri).await })
    };
    tokio::time::sleep(Duration::from_millis(250)).await;
    let (status, json) = get(harness.app(), &uri).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "busy");
    assert_eq!(first.await.expect("join").0, StatusCode::OK);
}

#[tokio::test]
async fn health_reports_ok() {
    let harness = Harness::new(CannedSource::no_changes("main"));

    let (status, json) = get(harness.app(), "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn cors_allows_configured_origin_only() {
    let harness = Harness::new(CannedSource::no_changes("main"));

    let allowed = harness
        .app()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header(header::ORIGIN, ORIGIN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some(&header::HeaderValue::from_static(ORIGIN))
    );

    let other = harness
        .app()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header(header::ORIGIN, "https://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(other
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[tokio::test]
async fn viewer_page_is_served_at_link_path() {
    let harness = Harness::new(CannedSource::no_changes("main"));
    let webapp = TempDir::new().expect("webapp tempdir");
    fs::create_dir(webapp.path().join("diff-viewer")).expect("create viewer dir");
    fs::write(
        webapp.path().join("diff-viewer").join("index.html"),
        "<html>viewer</html>",
    )
    .expect("write index");
    fs::write(webapp.path().join("app.js"), "render();").expect("write asset");
    let app = with_viewer(harness.app(), webapp.path());

    let (status, body) = get_text(app.clone(), "/diff-viewer/?token=abc.def.ghi").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<html>viewer</html>");

    let (status, body) = get_text(app.clone(), "/static/app.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "render();");

    let (status, json) = get(app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}
