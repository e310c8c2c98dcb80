use axum::{Json, extract::State};
use serde_json::{Value, json};
use std::time::Duration;

use crate::state::AppState;

pub async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    let supervisor = state.supervisor();
    let sessions = &state.config().sessions;

    Json(json!({
        "sessions": supervisor.status(),
        "shutting_down": supervisor.is_shutting_down(),
        "idle_timeout_ms": millis(sessions.idle_timeout),
        "readiness_timeout_ms": millis(sessions.readiness_timeout),
    }))
}

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let supervisor = state.supervisor();
    let status = if supervisor.is_shutting_down() {
        "draining"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": supervisor.registry().len(),
    }))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(2500)), 2500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
