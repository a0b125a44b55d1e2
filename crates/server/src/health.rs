use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use renta_db::DbPool;
use renta_retrieval::Retriever;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    retriever: Arc<Retriever>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

/// Composite readiness: the catalog index must be loaded and the CRM
/// store reachable. The container orchestrator keys restarts off this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub index: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, retriever: Arc<Retriever>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, retriever })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let index = index_check(&state.retriever).await;
    let database = database_check(&state.db_pool).await;
    let ready = index.status == "ready" && database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        index,
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn index_check(retriever: &Retriever) -> HealthCheck {
    let chunks = retriever.chunk_count().await;
    if chunks > 0 {
        HealthCheck { status: "ready", detail: format!("catalog index loaded ({chunks} chunks)") }
    } else {
        HealthCheck { status: "degraded", detail: "catalog index is empty".to_string() }
    }
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
