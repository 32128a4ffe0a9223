//! Public status page.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;
use crate::config::Configuration;
use crate::provisioning::DeleteBehavior;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    version: &'static str,
    name: &'static str,
    delete_behavior: DeleteBehavior,
    metrics: bool,
}

pub async fn status(
    State(state): State<AppState>,
    State(config): State<Arc<Configuration>>,
) -> Json<Status> {
    Json(Status {
        version: env!("CARGO_PKG_VERSION"),
        name: env!("CARGO_PKG_NAME"),
        delete_behavior: state.provisioner.delete_behavior(),
        metrics: config.metrics,
    })
}
