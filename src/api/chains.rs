//! Chain definition CRUD, async execution, and run polling endpoints
//!
//! Chain execution is asynchronous: the execute call answers 202 with an
//! execution id, a spawned driver task advances the run step by step, and
//! GET /chain-executions/{id} polls progress. The driver refreshes the live
//! snapshot between steps so pollers see the current step index.

use crate::api::AppState;
use crate::chain::types::{Chain, ChainExecution};
use crate::flow::types::{ExecutionError, ExecutionStatus};
use crate::flow::validate::validate_chain;
use crate::runtime::records::CancelHandle;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/agent-chains", post(create_chain))
        .route("/agent-chains", get(list_chains))
        .route("/agent-chains/{id}", get(get_chain))
        .route("/agent-chains/{id}", delete(delete_chain))
        .route("/agent-chains/{id}/execute", post(execute_chain))
        .route("/chain-executions/{id}", get(get_chain_execution))
}

/// Body of POST /agent-chains/{id}/execute.
#[derive(Debug, Deserialize)]
struct ExecuteChainRequest {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    variables: Map<String, Value>,
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

/// POST /agent-chains
async fn create_chain(
    State(state): State<AppState>,
    Json(mut chain): Json<Chain>,
) -> Result<(StatusCode, Json<Chain>), (StatusCode, Json<Value>)> {
    if chain.name.is_empty() {
        return Err(bad_request("chain requires a non-empty name".to_string()));
    }
    if chain.id.is_empty() {
        chain.id = uuid::Uuid::new_v4().to_string();
    }
    if let Err(e) = validate_chain(&chain) {
        return Err(bad_request(e.to_string()));
    }

    match state.storage.get_chain(&chain.id).await {
        Ok(Some(_)) => {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({ "error": format!("chain '{}' already exists", chain.id) })),
            ))
        }
        Ok(None) => {}
        Err(e) => return Err(internal_error("chain lookup failed", e)),
    }

    state
        .storage
        .save_chain(&chain)
        .await
        .map_err(|e| internal_error("failed to save chain", e))?;
    tracing::info!("created chain: {} ({})", chain.id, chain.name);
    Ok((StatusCode::CREATED, Json(chain)))
}

/// GET /agent-chains
async fn list_chains(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.storage.list_chains().await {
        Ok(chains) => Ok(Json(json!({ "chains": chains }))),
        Err(e) => Err(internal_error("failed to list chains", e)),
    }
}

/// GET /agent-chains/{id}
async fn get_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Chain>, (StatusCode, Json<Value>)> {
    match state.storage.get_chain(&id).await {
        Ok(Some(chain)) => Ok(Json(chain)),
        Ok(None) => Err(not_found()),
        Err(e) => Err(internal_error("failed to get chain", e)),
    }
}

/// DELETE /agent-chains/{id}
async fn delete_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.storage.delete_chain(&id).await {
        Ok(true) => {
            tracing::info!("deleted chain: {}", id);
            Ok(Json(json!({ "id": id })))
        }
        Ok(false) => Err(not_found()),
        Err(e) => Err(internal_error("failed to delete chain", e)),
    }
}

/// POST /agent-chains/{id}/execute
///
/// 202 Accepted: the run continues in a background task after the response.
async fn execute_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ExecuteChainRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let chain = match state.storage.get_chain(&id).await {
        Ok(Some(chain)) => chain,
        Ok(None) => return Err(not_found()),
        Err(e) => return Err(internal_error("chain lookup failed", e)),
    };

    let execution = state
        .records
        .start_chain(&id, request.input, request.variables)
        .await
        .map_err(|e| internal_error("failed to open chain execution", e))?;
    let execution_id = execution.id.clone();

    let stepper = state.stepper.clone();
    let records = state.records.clone();
    tokio::spawn(async move {
        drive_chain(&stepper, &records, chain, execution).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "executionId": execution_id, "status": ExecutionStatus::Running })),
    ))
}

/// Advance the execution to a terminal state, publishing a live snapshot
/// after every step.
async fn drive_chain(
    stepper: &crate::chain::stepper::ChainStepper,
    records: &crate::runtime::records::ExecutionRecords,
    chain: Chain,
    mut execution: ChainExecution,
) {
    let cancel = CancelHandle::new();
    while !execution.status.is_terminal() {
        match stepper.advance(&chain, &mut execution, &cancel).await {
            Ok(()) => records.update_live_chain(&execution).await,
            Err(error) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(ExecutionError {
                    kind: error.kind().to_string(),
                    message: error.to_string(),
                });
                execution.completed_at = Some(chrono::Utc::now());
            }
        }
    }
    if let Err(e) = records.finish_chain(&execution).await {
        tracing::error!(
            "failed to persist terminal chain execution {}: {}",
            execution.id,
            e
        );
    }
}

/// GET /chain-executions/{id}
async fn get_chain_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.records.get_chain_execution(&id).await {
        Ok(Some(execution)) => Ok(Json(json!({
            "executionId": execution.id,
            "chainId": execution.chain_id,
            "status": execution.status,
            "currentStep": execution.current_step_index,
            "perStepResult": execution.per_step_result,
            "variables": execution.variables,
            "error": execution.error,
        }))),
        Ok(None) => Err(not_found()),
        Err(e) => Err(internal_error("failed to get chain execution", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::state_with_invoker;
    use crate::runtime::invoker::mock::{FailingInvoker, ScriptedInvoker};
    use crate::runtime::invoker::AgentInvoker;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app(invoker: Arc<dyn AgentInvoker>) -> Router {
        let state = state_with_invoker(invoker).await;
        routes().with_state(state)
    }

    fn request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn sample_chain(id: &str) -> Value {
        json!({
            "id": id,
            "name": "pipeline",
            "steps": [
                {"id": "s1", "agentRef": "drafter"},
                {
                    "id": "s2",
                    "agentRef": "polisher",
                    "inputMapping": {"text": "$.steps.s1.output.text"},
                    "outputMapping": {"final": "$.output.text"}
                }
            ]
        })
    }

    /// Poll the execution endpoint until the driver task reaches a terminal
    /// status.
    async fn poll_terminal(app: &Router, execution_id: &str) -> Value {
        for _ in 0..50 {
            let response = app
                .clone()
                .oneshot(
                    Request::get(format!("/chain-executions/{}", execution_id))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let body = body_json(response).await;
            if body["status"] != json!("running") {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("chain execution never reached a terminal status");
    }

    #[tokio::test]
    async fn create_rejects_empty_steps() {
        let app = app(Arc::new(ScriptedInvoker::new(vec![]))).await;
        let response = app
            .oneshot(request(
                Method::POST,
                "/agent-chains",
                json!({"id": "c1", "name": "empty", "steps": []}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_without_id_generates_one() {
        let app = app(Arc::new(ScriptedInvoker::new(vec![]))).await;

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/agent-chains",
                json!({
                    "name": "pipeline",
                    "steps": [{"id": "s1", "agentRef": "drafter"}]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // the 201 body is the created chain, with a server-generated id
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap();
        assert!(!id.is_empty());
        assert_eq!(created["steps"][0]["agentRef"], json!("drafter"));

        let response = app
            .oneshot(
                Request::get(format!("/agent-chains/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn execute_answers_202_and_runs_to_completion() {
        let app = app(Arc::new(ScriptedInvoker::new(vec![
            ("drafter", json!({"text": "draft"})),
            ("polisher", json!({"text": "polished"})),
        ])))
        .await;

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/agent-chains", sample_chain("c1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/agent-chains/c1/execute",
                json!({"input": {"topic": "rust"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        let execution_id = body["executionId"].as_str().unwrap().to_string();

        let terminal = poll_terminal(&app, &execution_id).await;
        assert_eq!(terminal["status"], json!("completed"));
        assert_eq!(terminal["perStepResult"]["s1"]["status"], json!("success"));
        assert_eq!(terminal["perStepResult"]["s2"]["status"], json!("success"));
        assert_eq!(terminal["variables"]["final"], json!("polished"));
    }

    #[tokio::test]
    async fn failed_step_surfaces_in_polled_record() {
        let app = app(Arc::new(FailingInvoker::new())).await;
        app.clone()
            .oneshot(request(Method::POST, "/agent-chains", sample_chain("c1")))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/agent-chains/c1/execute", json!({})))
            .await
            .unwrap();
        let body = body_json(response).await;
        let execution_id = body["executionId"].as_str().unwrap().to_string();

        let terminal = poll_terminal(&app, &execution_id).await;
        assert_eq!(terminal["status"], json!("failed"));
        assert_eq!(terminal["error"]["kind"], json!("agent_invocation"));
        assert_eq!(terminal["perStepResult"]["s1"]["status"], json!("failed"));
    }

    #[tokio::test]
    async fn execute_unknown_chain_is_404() {
        let app = app(Arc::new(ScriptedInvoker::new(vec![]))).await;
        let response = app
            .oneshot(request(
                Method::POST,
                "/agent-chains/ghost/execute",
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_execution_is_404() {
        let app = app(Arc::new(ScriptedInvoker::new(vec![]))).await;
        let response = app
            .oneshot(
                Request::get("/chain-executions/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn crud_roundtrip() {
        let app = app(Arc::new(ScriptedInvoker::new(vec![]))).await;
        app.clone()
            .oneshot(request(Method::POST, "/agent-chains", sample_chain("c1")))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::get("/agent-chains/c1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["id"], json!("c1"));

        let response = app
            .clone()
            .oneshot(
                Request::delete("/agent-chains/c1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::get("/agent-chains/c1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
