//! HTTP surface
//!
//! Thin layer over the orchestrator: list the known bindings and trigger a
//! transform by binding id, returning the artifact bytes for download.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::AppResult;
use crate::pipeline::IngestionOrchestrator;
use crate::store::TransformerBinding;

/// State shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<IngestionOrchestrator>,
}

/// Build the application router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/transformers", get(list_transformers))
        .route("/api/transformers/:id/transform", post(transform))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Wire shape of one binding
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BindingResponse {
    id: i64,
    created: DateTime<Utc>,
    transformer_type_name: String,
    source_identity: String,
}

impl From<TransformerBinding> for BindingResponse {
    fn from(binding: TransformerBinding) -> Self {
        Self {
            id: binding.id,
            created: binding.created,
            transformer_type_name: binding.transformer,
            source_identity: binding.source_identity,
        }
    }
}

/// GET /api/transformers
async fn list_transformers(State(state): State<ApiState>) -> AppResult<Json<Vec<BindingResponse>>> {
    let bindings = state.orchestrator.bindings().await?;
    Ok(Json(bindings.into_iter().map(Into::into).collect()))
}

/// POST /api/transformers/:id/transform
///
/// Returns the artifact bytes with download headers, or 404 for an unknown
/// binding.
async fn transform(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let output = state.orchestrator.transform(id).await?;

    let headers = [
        (header::CONTENT_TYPE, output.mime_type.clone()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", output.file_name()),
        ),
    ];

    Ok((StatusCode::OK, headers, output.bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Catalog;
    use crate::source::SourceRegistry;
    use crate::store::ContentStore;
    use crate::transform::TransformerRegistry;
    use tower::ServiceExt;

    async fn empty_state(dir: &std::path::Path) -> ApiState {
        let store = Arc::new(
            ContentStore::open(dir.join("store.db"), dir.join("blobs"))
                .await
                .unwrap(),
        );
        let orchestrator = IngestionOrchestrator::bootstrap(
            Catalog::default(),
            &SourceRegistry::with_defaults(),
            &TransformerRegistry::with_defaults(),
            store,
        )
        .await
        .unwrap();
        ApiState { orchestrator: Arc::new(orchestrator) }
    }

    #[tokio::test]
    async fn test_health_responds_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(empty_state(dir.path()).await);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_transformers_empty() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(empty_state(dir.path()).await);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/transformers")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_transform_unknown_binding_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(empty_state(dir.path()).await);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/transformers/42/transform")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
