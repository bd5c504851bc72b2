//! HTTP surface for Glance.
//!
//! Serves `GET /api/diff/:token` to the rendering frontend and a health probe,
//! plus the static viewer bundle when one is configured.
//! Request URIs carry bearer tokens, so no URI-logging layer is installed.

pub mod config;
pub mod logging;

use std::path::Path as FsPath;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use glance_core::{service::DiffService, DiffResponse, Error, ErrorBody, ErrorKind};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

/// Directory inside the webapp bundle holding the viewer page.
pub const VIEWER_DIR: &str = "diff-viewer";

/// Build the application router over `service`.
pub fn router(service: DiffService, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/diff/:token", get(get_diff))
        .route("/api/health", get(health))
        .layer(cors)
        .with_state(service)
}

/// Mount the static viewer from `webapp_dir` on `app`.
///
/// `webapp_dir/diff-viewer/index.html` answers `/diff-viewer/`, the page
/// issued links point at; the rest of the bundle is under `/static`.
pub fn with_viewer(app: Router, webapp_dir: impl AsRef<FsPath>) -> Router {
    let webapp_dir = webapp_dir.as_ref();
    app.nest_service("/diff-viewer", ServeDir::new(webapp_dir.join(VIEWER_DIR)))
        .nest_service("/static", ServeDir::new(webapp_dir))
}

/// CORS policy admitting `origins` for `GET` only. `*` admits any origin.
///
/// # Errors
///
/// Fails when an origin is not a valid header value.
pub fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    if origins.iter().any(|origin| origin == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|err| anyhow::anyhow!("invalid allowed origin {origin:?}: {err}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(origins))
}

/// HTTP status for each public error kind.
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::TokenMalformed | ErrorKind::TokenExpired | ErrorKind::TokenSignatureMismatch => {
            StatusCode::UNAUTHORIZED
        }
        ErrorKind::InvalidPath | ErrorKind::PathNotAllowed => StatusCode::FORBIDDEN,
        ErrorKind::NotARepository => StatusCode::NOT_FOUND,
        ErrorKind::OperationTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Busy => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::CommandFailure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Failed request; only its kind reaches the client.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        (status_for(kind), Json(ErrorBody::from(kind))).into_response()
    }
}

async fn get_diff(
    State(service): State<DiffService>,
    Path(token): Path<String>,
) -> Result<Json<DiffResponse>, ApiError> {
    let result = service.get_diff(&token).await?;
    Ok(Json(DiffResponse::from(result)))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_failures_are_unauthorized() {
        for kind in [
            ErrorKind::TokenMalformed,
            ErrorKind::TokenExpired,
            ErrorKind::TokenSignatureMismatch,
        ] {
            assert_eq!(status_for(kind), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn execution_failures_map_to_distinct_statuses() {
        assert_eq!(status_for(ErrorKind::PathNotAllowed), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::NotARepository), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::OperationTimeout),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status_for(ErrorKind::Busy), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(ErrorKind::CommandFailure),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rejects_unparseable_origin() {
        assert!(cors_layer(&["https://web.telegram.org".to_owned()]).is_ok());
        assert!(cors_layer(&["bad\norigin".to_owned()]).is_err());
        assert!(cors_layer(&["*".to_owned()]).is_ok());
    }
}
