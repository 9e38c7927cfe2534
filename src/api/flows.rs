//! Flow definition CRUD and synchronous execution endpoints
//!
//! All definition changes trigger immediate registry updates, so a saved
//! flow is executable on the next request with no restart. Validation
//! failures surface as 400 with the validation message; runtime failures of
//! an execute call still answer 200 with a failed execution record.

use crate::api::AppState;
use crate::flow::registry::CompiledFlow;
use crate::flow::types::Flow;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/agent-apps", post(create_flow))
        .route("/agent-apps", get(list_flows))
        .route("/agent-apps/{id}", get(get_flow))
        .route("/agent-apps/{id}", put(update_flow))
        .route("/agent-apps/{id}", delete(delete_flow))
        .route("/agent-apps/{id}/execute", post(execute_flow))
}

/// Body of POST /agent-apps/{id}/execute. Both parts default to null.
#[derive(Debug, Deserialize)]
struct ExecuteFlowRequest {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    context: Value,
}

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn internal_error(context: &str, error: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    tracing::error!("{}: {}", context, error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}

fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

/// POST /agent-apps
async fn create_flow(
    State(state): State<AppState>,
    Json(mut flow): Json<Flow>,
) -> Result<(StatusCode, Json<Flow>), (StatusCode, Json<Value>)> {
    if flow.name.is_empty() {
        return Err(bad_request("flow requires a non-empty name".to_string()));
    }
    if flow.id.is_empty() {
        flow.id = uuid::Uuid::new_v4().to_string();
    }
    // Structural validation happens before anything is persisted.
    if let Err(e) = CompiledFlow::compile(flow.clone()) {
        return Err(bad_request(e.to_string()));
    }

    match state.storage.get_flow(&flow.id).await {
        Ok(Some(_)) => {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({ "error": format!("flow '{}' already exists", flow.id) })),
            ))
        }
        Ok(None) => {}
        Err(e) => return Err(internal_error("flow lookup failed", e)),
    }

    save_and_reload(&state, &flow).await?;
    tracing::info!("created flow: {} ({})", flow.id, flow.name);
    Ok((StatusCode::CREATED, Json(flow)))
}

/// PUT /agent-apps/{id}
async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut flow): Json<Flow>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    flow.id = id.clone();
    if flow.name.is_empty() {
        return Err(bad_request("flow requires a non-empty name".to_string()));
    }
    if let Err(e) = CompiledFlow::compile(flow.clone()) {
        return Err(bad_request(e.to_string()));
    }

    match state.storage.get_flow(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(not_found()),
        Err(e) => return Err(internal_error("flow lookup failed", e)),
    }

    save_and_reload(&state, &flow).await?;
    tracing::info!("updated flow: {}", id);
    Ok(Json(json!({ "id": id })))
}

async fn save_and_reload(state: &AppState, flow: &Flow) -> Result<(), (StatusCode, Json<Value>)> {
    state
        .storage
        .save_flow(flow)
        .await
        .map_err(|e| internal_error("failed to save flow", e))?;
    state
        .registry
        .reload_flow(&flow.id)
        .await
        .map_err(|e| internal_error("failed to reload flow", e))
}

/// GET /agent-apps
async fn list_flows(State(state): State<AppState>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.storage.list_flows().await {
        Ok(flows) => Ok(Json(json!({ "flows": flows }))),
        Err(e) => Err(internal_error("failed to list flows", e)),
    }
}

/// GET /agent-apps/{id}
async fn get_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Flow>, (StatusCode, Json<Value>)> {
    match state.storage.get_flow(&id).await {
        Ok(Some(flow)) => Ok(Json(flow)),
        Ok(None) => Err(not_found()),
        Err(e) => Err(internal_error("failed to get flow", e)),
    }
}

/// DELETE /agent-apps/{id}
async fn delete_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.registry.remove_flow(&id);
    match state.storage.delete_flow(&id).await {
        Ok(true) => {
            tracing::info!("deleted flow: {}", id);
            Ok(Json(json!({ "id": id })))
        }
        Ok(false) => Err(not_found()),
        Err(e) => Err(internal_error("failed to delete flow", e)),
    }
}

/// POST /agent-apps/{id}/execute
///
/// Synchronous: the response carries the terminal execution record. A flow
/// whose run fails still answers 200; the failure lives in the record.
async fn execute_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ExecuteFlowRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(compiled) = state.registry.get_flow(&id) else {
        return Err(not_found());
    };

    let execution = state
        .records
        .start_flow(&id, request.input.clone(), request.context.clone())
        .await
        .map_err(|e| internal_error("failed to open execution record", e))?;

    let cancel = crate::runtime::records::CancelHandle::new();
    let mut results = std::collections::HashMap::new();
    let run = state
        .scheduler
        .run(
            &compiled,
            &request.input,
            &request.context,
            &cancel,
            &mut results,
        )
        .await;

    let record = match run {
        Ok(()) => state
            .records
            .complete_flow(execution, results)
            .await
            .map_err(|e| internal_error("failed to record completion", e))?,
        // results settled before the failure stay on the record
        Err(error) => state
            .records
            .fail_flow(execution, &error, results)
            .await
            .map_err(|e| internal_error("failed to record failure", e))?,
    };

    Ok(Json(json!({
        "executionId": record.id,
        "status": record.status,
        "results": record.results,
        "error": record.error,
    })))
}
