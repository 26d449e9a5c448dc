//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use coordination::{CircuitBreakerSnapshot, CircuitState};
use serde::Serialize;

use crate::state::{AppState, Backends};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub dead_letters: DeadLetterHealth,
}

#[derive(Serialize)]
pub struct DeadLetterHealth {
    /// `None` when the store could not be queried.
    pub pending: Option<u64>,
}

/// GET /health: reports breaker state and the dead-letter backlog.
///
/// Always answers 200; `status` is `degraded` while the breaker is not closed
/// or the dead-letter store is unreachable.
pub async fn check<B: Backends>(State(state): State<Arc<AppState<B>>>) -> Json<HealthResponse> {
    let circuit_breaker = state.breaker().snapshot();
    let pending = match state.dead_letters.count_pending().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not count dead letters");
            None
        }
    };

    let status = if circuit_breaker.state == CircuitState::Closed && pending.is_some() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        circuit_breaker,
        dead_letters: DeadLetterHealth { pending },
    })
}
