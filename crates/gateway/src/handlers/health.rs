//! Liveness and readiness probes
//!
//! Liveness reports that the process is up and serving. Readiness
//! additionally requires the document store to answer a ping, since
//! every business endpoint reads or writes records.

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use docharbor_common::{db::DocumentStore, VERSION};
use serde::Serialize;
use std::time::Instant;

#[derive(Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness probe
pub async fn health() -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        version: VERSION,
    })
}

#[derive(Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub store: DependencyCheck,
}

#[derive(Serialize)]
pub struct DependencyCheck {
    pub reachable: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Readiness probe; answers 503 until the store is reachable
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let started = Instant::now();

    let store = match state.store.ping().await {
        Ok(()) => DependencyCheck {
            reachable: true,
            latency_ms: started.elapsed().as_millis() as u64,
            detail: None,
        },
        Err(e) => DependencyCheck {
            reachable: false,
            latency_ms: started.elapsed().as_millis() as u64,
            detail: Some(e.to_string()),
        },
    };

    let status = if store.reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(Readiness {
            ready: store.reachable,
            store,
        }),
    )
}
