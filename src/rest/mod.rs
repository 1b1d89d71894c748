// rest/mod.rs — HTTP ingress.
//
// Endpoints:
//   POST   /webhooks/{event_type}                 (webhook deliveries)
//   GET    /workspaces/{ws}/rules
//   POST   /workspaces/{ws}/rules
//   DELETE /workspaces/{ws}/rules/{rule_id}
//   POST   /workspaces/{ws}/cache/refresh         (operator-triggered)
//   GET    /health
//   GET    /metrics                               (Prometheus text)
//
// Webhook signature verification happens upstream — this server trusts the
// delivery system in front of it.

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::engine::orchestrator::{WebhookEvent, WebhookStatus};
use crate::health::ReadinessStatus;
use crate::rules::model::Rule;
use crate::rules::store::RuleStore;
use crate::rules::validate::validate_rule;
use crate::EngineContext;

pub async fn serve(ctx: Arc<EngineContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;
    let router = build_router(ctx);

    info!("rulesd listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<EngineContext>) -> Router {
    Router::new()
        .route("/webhooks/{event_type}", post(handle_webhook))
        .route(
            "/workspaces/{workspace_id}/rules",
            get(list_rules).post(save_rule),
        )
        .route(
            "/workspaces/{workspace_id}/rules/{rule_id}",
            delete(delete_rule),
        )
        .route("/workspaces/{workspace_id}/cache/refresh", post(refresh_cache))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// ─── Webhooks ────────────────────────────────────────────────────────────────

async fn handle_webhook(
    State(ctx): State<Arc<EngineContext>>,
    Path(event_type): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    let Some(workspace_id) = payload
        .get("workspaceId")
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "workspaceId missing in payload"})),
        )
            .into_response();
    };

    // Payloads may carry their own event name; it wins over the path.
    let event_type = payload
        .get("event")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(event_type);

    let reply = ctx
        .orchestrator
        .handle(WebhookEvent {
            event_type,
            workspace_id,
            payload_id: None,
            payload,
        })
        .await;

    let status = match reply.status {
        WebhookStatus::Failed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(reply)).into_response()
}

// ─── Rule CRUD ───────────────────────────────────────────────────────────────

async fn list_rules(
    State(ctx): State<Arc<EngineContext>>,
    Path(workspace_id): Path<String>,
) -> Response {
    match ctx.store.get_all(&workspace_id).await {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => store_unavailable(e),
    }
}

async fn save_rule(
    State(ctx): State<Arc<EngineContext>>,
    Path(workspace_id): Path<String>,
    Json(rule): Json<Rule>,
) -> Response {
    if let Err(e) = validate_rule(&rule) {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response();
    }
    match ctx.store.save(&workspace_id, rule).await {
        Ok(saved) => (StatusCode::OK, Json(saved)).into_response(),
        Err(e) => store_unavailable(e),
    }
}

async fn delete_rule(
    State(ctx): State<Arc<EngineContext>>,
    Path((workspace_id, rule_id)): Path<(String, String)>,
) -> Response {
    match ctx.store.delete(&workspace_id, &rule_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "rule not found"})),
        )
            .into_response(),
        Err(e) => store_unavailable(e),
    }
}

fn store_unavailable(e: crate::rules::store::StoreError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": e.to_string()})),
    )
        .into_response()
}

// ─── Workspace cache ─────────────────────────────────────────────────────────

async fn refresh_cache(
    State(ctx): State<Arc<EngineContext>>,
    Path(workspace_id): Path<String>,
) -> Response {
    let Some(token) = ctx.tokens.get(&workspace_id) else {
        return (
            StatusCode::PRECONDITION_FAILED,
            Json(json!({"error": "workspace installation token not found"})),
        )
            .into_response();
    };
    match ctx.cache.refresh(&workspace_id, &token).await {
        Ok(snap) => Json(json!({
            "status": "refreshed",
            "loadedAt": snap.loaded_at,
            "truncated": snap.truncated.any(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ─── Health & metrics ────────────────────────────────────────────────────────

async fn health(State(ctx): State<Arc<EngineContext>>) -> Response {
    let status = ctx.readiness.status();
    let code = match status {
        ReadinessStatus::Ok => StatusCode::OK,
        ReadinessStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(json!({"status": status}))).into_response()
}

async fn metrics(State(ctx): State<Arc<EngineContext>>) -> Response {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        ctx.metrics.render_prometheus(),
    )
        .into_response()
}
