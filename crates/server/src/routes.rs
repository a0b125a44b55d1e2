//! JSON API surface: chat, session lifecycle, and the CRM dashboard.
//!
//! Handlers are thin wrappers over the orchestrator and session store;
//! every failure path returns a typed error object with a correlation id,
//! never a raw internal error.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use renta_agent::{Orchestrator, SessionSnapshot, SessionStore};
use renta_core::errors::ApiError;
use renta_db::repositories::DashboardReader;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionStore>,
    pub dashboard: Arc<dyn DashboardReader>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(api_info))
        .route("/chat", post(chat))
        .route("/chat/new", post(new_session))
        .route("/chat/{session_id}", delete(reset_session))
        .route("/sessions/{session_id}", delete(delete_session))
        .route("/sessions/{session_id}/stats", get(session_stats))
        .route("/crm/dashboard", get(crm_dashboard))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    #[serde(default)]
    pub verbose: bool,
    /// Caller-specified whole-turn budget; the configured default applies
    /// when absent.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub session_id: String,
    pub timestamp: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SessionSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_invoked: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewSessionRequest {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

type ApiFailure = (StatusCode, Json<ErrorBody>);

fn failure(error: ApiError) -> ApiFailure {
    let status = match &error {
        ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
        ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        ApiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let correlation_id = match &error {
        ApiError::NotFound { correlation_id, .. }
        | ApiError::BadRequest { correlation_id, .. }
        | ApiError::Timeout { correlation_id, .. }
        | ApiError::ServiceUnavailable { correlation_id, .. }
        | ApiError::Internal { correlation_id, .. } => correlation_id.clone(),
    };
    let body = ErrorBody {
        error: error.kind(),
        message: error.user_message().to_string(),
        correlation_id,
    };
    (status, Json(body))
}

async fn api_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "renta",
        "description": "Asistente de ventas para renta de equipos de construcción",
        "profile": state.orchestrator.profile().as_str(),
        "model": state.orchestrator.model_name(),
        "endpoints": {
            "POST /chat": "Enviar mensaje al agente",
            "POST /chat/new": "Iniciar nueva sesión",
            "DELETE /chat/{session_id}": "Borrar historial de sesión",
            "DELETE /sessions/{session_id}": "Eliminar sesión",
            "GET /sessions/{session_id}/stats": "Estadísticas de sesión",
            "GET /crm/dashboard": "Dashboard CRM",
            "GET /health": "Health check",
        },
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiFailure> {
    let correlation_id = Uuid::new_v4().to_string();

    if request.message.trim().is_empty() || request.session_id.trim().is_empty() {
        return Err(failure(ApiError::BadRequest {
            message: "message and session_id must not be empty".to_string(),
            correlation_id,
        }));
    }

    let timeout = request.timeout_secs.map(Duration::from_secs);
    let outcome = state
        .orchestrator
        .run_turn(&request.session_id, &request.message, timeout)
        .await
        .map_err(|turn_error| {
            error!(
                event_name = "api.chat.failed",
                correlation_id = %correlation_id,
                session_id = %request.session_id,
                error = %turn_error,
                "chat turn failed"
            );
            failure(turn_error.into_api(correlation_id.clone()))
        })?;

    info!(
        event_name = "api.chat.completed",
        correlation_id = %correlation_id,
        session_id = %outcome.session_id,
        tools = outcome.tools_invoked.len(),
        tokens = outcome.tokens_used,
        "chat turn completed"
    );

    let (stats, tools_invoked) = if request.verbose {
        let snapshot = state.sessions.stats(&outcome.session_id).await.ok();
        let tools = outcome.tools_invoked.iter().map(|name| name.to_string()).collect();
        (snapshot, Some(tools))
    } else {
        (None, None)
    };

    Ok(Json(ChatResponse {
        reply: outcome.reply,
        session_id: outcome.session_id,
        timestamp: Utc::now().to_rfc3339(),
        tokens_used: outcome.tokens_used,
        cost_usd: outcome.cost_usd,
        customer_name: outcome.customer_name,
        stats,
        tools_invoked,
        warning: outcome.warning,
    }))
}

async fn new_session(
    State(state): State<AppState>,
    Json(request): Json<NewSessionRequest>,
) -> Json<Value> {
    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    state.sessions.new_session(&session_id).await;

    info!(
        event_name = "api.session.created",
        session_id = %session_id,
        "new session started"
    );
    Json(json!({ "message": "Nueva sesión iniciada", "session_id": session_id }))
}

async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiFailure> {
    let correlation_id = Uuid::new_v4().to_string();
    let customer_name = state
        .sessions
        .reset(&session_id)
        .await
        .map_err(|turn_error| failure(turn_error.into_api(correlation_id)))?;

    Ok(Json(json!({
        "message": "Historial borrado exitosamente",
        "session_id": session_id,
        "customer_name": customer_name,
    })))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiFailure> {
    let correlation_id = Uuid::new_v4().to_string();
    state
        .sessions
        .delete(&session_id)
        .await
        .map_err(|turn_error| failure(turn_error.into_api(correlation_id)))?;

    Ok(Json(json!({ "message": "Sesión eliminada", "session_id": session_id })))
}

async fn session_stats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiFailure> {
    let correlation_id = Uuid::new_v4().to_string();
    let snapshot = state
        .sessions
        .stats(&session_id)
        .await
        .map_err(|turn_error| failure(turn_error.into_api(correlation_id)))?;

    Ok(Json(snapshot))
}

async fn crm_dashboard(State(state): State<AppState>) -> Result<Json<Value>, ApiFailure> {
    let correlation_id = Uuid::new_v4().to_string();
    let summary = state.dashboard.summary().await.map_err(|repo_error| {
        error!(
            event_name = "api.dashboard.failed",
            correlation_id = %correlation_id,
            error = %repo_error,
            "dashboard aggregation failed"
        );
        failure(ApiError::Internal {
            message: "dashboard aggregation failed".to_string(),
            correlation_id: correlation_id.clone(),
        })
    })?;

    Ok(Json(serde_json::to_value(summary).unwrap_or_else(|_| json!({}))))
}
