//! REST endpoints for panel counts.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use super::counts::{CountPlan, effective_queries};
use super::model::{CountResult, PanelConfig};
use crate::auth::TokenSource;
use crate::backend::MailBackend;
use crate::error::{Error, ErrorClass};

/// Shared state for panel routes.
#[derive(Clone)]
pub struct PanelRouteState {
    pub backend: Arc<dyn MailBackend>,
    pub tokens: Arc<dyn TokenSource>,
}

/// Body of both panel endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelsRequest {
    #[serde(default)]
    pub panels: Option<Vec<PanelConfig>>,
    #[serde(default)]
    pub search_query: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountsResponse {
    pub counts: Vec<CountResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueriesResponse {
    pub queries: Vec<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let class = self.class();
        let status = match class {
            ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
            ErrorClass::Unauthenticated | ErrorClass::SessionExpired => StatusCode::UNAUTHORIZED,
            ErrorClass::Upstream => StatusCode::BAD_GATEWAY,
            ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({
                "error": class.as_str(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

fn parse_body(body: Result<Json<PanelsRequest>, JsonRejection>) -> Result<PanelsRequest, Error> {
    body.map(|Json(request)| request)
        .map_err(|e| Error::validation(e.body_text()))
}

fn require_panels(panels: Option<Vec<PanelConfig>>) -> Result<Vec<PanelConfig>, Error> {
    panels
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::validation("panels must be a non-empty array"))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "inbox-panels"
    }))
}

// ── Panels ──────────────────────────────────────────────────────────────

/// POST /api/panels/counts
///
/// Returns `{ "counts": [...] }`, one entry per panel in request order.
async fn post_counts(
    State(state): State<PanelRouteState>,
    body: Result<Json<PanelsRequest>, JsonRejection>,
) -> Result<Json<CountsResponse>, Error> {
    let request_id = Uuid::new_v4();
    count_panels(state, body)
        .instrument(info_span!("panel_counts", %request_id))
        .await
        .map(Json)
        .inspect_err(|e| {
            warn!(%request_id, error = %e, class = e.class().as_str(), "Panel counts failed");
        })
}

async fn count_panels(
    state: PanelRouteState,
    body: Result<Json<PanelsRequest>, JsonRejection>,
) -> Result<CountsResponse, Error> {
    let request = parse_body(body)?;
    let panels = require_panels(request.panels)?;
    let plan = CountPlan::new(&panels, request.search_query.as_deref())?;
    let token = state.tokens.access_token().await?;
    let counts = plan.fetch(state.backend.as_ref(), &token).await?;
    info!(panels = panels.len(), "Panel counts computed");
    Ok(CountsResponse { counts })
}

/// POST /api/panels/queries
///
/// Returns the search query each panel is counted against. No backend call.
async fn post_queries(
    body: Result<Json<PanelsRequest>, JsonRejection>,
) -> Result<Json<QueriesResponse>, Error> {
    let request = parse_body(body)?;
    let panels = require_panels(request.panels)?;
    let queries = effective_queries(&panels, request.search_query.as_deref())?;
    Ok(Json(QueriesResponse { queries }))
}

/// Build the panel REST routes.
pub fn panel_routes(state: PanelRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/panels/counts", post(post_counts))
        .route("/api/panels/queries", post(post_queries))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::NoCredentials;
    use crate::backend::{GmailBackend, GmailConfig};

    fn router() -> Router {
        let backend = GmailBackend::new(GmailConfig {
            api_base: "http://127.0.0.1:1".into(),
            batch_url: "http://127.0.0.1:1/batch".into(),
            ..GmailConfig::default()
        })
        .unwrap();
        panel_routes(PanelRouteState {
            backend: Arc::new(backend),
            tokens: Arc::new(NoCredentials),
        })
    }

    async fn post_json(path: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (status, json) = post_json("/api/panels/counts", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "bad_request");
    }

    #[tokio::test]
    async fn missing_panels_is_bad_request() {
        let (status, json) = post_json("/api/panels/counts", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("non-empty"));

        let (status, _) = post_json("/api/panels/counts", r#"{"panels": []}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_credentials_is_unauthenticated() {
        let (status, json) =
            post_json("/api/panels/counts", r#"{"panels": [{"name": "Inbox"}]}"#).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "unauthenticated");
    }

    #[tokio::test]
    async fn bad_pattern_is_rejected_before_credentials() {
        let body = r#"{"panels": [{"name": "Bad", "rules": [{"field": "subject", "pattern": "[x", "action": "accept"}]}]}"#;
        let (status, json) = post_json("/api/panels/counts", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "bad_request");
        assert!(json["message"].as_str().unwrap().contains("Bad"));
    }

    #[tokio::test]
    async fn queries_route_compiles_without_credentials() {
        let body = r#"{
            "panels": [
                {"name": "Work", "rules": [{"field": "from", "pattern": "@company.com", "action": "accept"}]},
                {"name": "Other", "kind": "catchAll"}
            ],
            "searchQuery": "is:unread"
        }"#;
        let (status, json) = post_json("/api/panels/queries", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["queries"],
            serde_json::json!([
                "((from:@company.com)) AND (is:unread)",
                "(-((from:@company.com))) AND (is:unread)"
            ])
        );
    }

    #[tokio::test]
    async fn invalid_rule_pattern_is_bad_request() {
        let body = r#"{"panels": [{"name": "Bad", "rules": [{"field": "subject", "pattern": "", "action": "accept"}]}]}"#;
        let (status, json) = post_json("/api/panels/queries", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("Bad"));
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
