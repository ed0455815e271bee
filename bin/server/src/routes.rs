//! HTTP surface over the execution engine.
//!
//! Exactly the four engine operations plus a health probe; workflow editing
//! stays out of this server. Ids in URLs and bodies are accepted in both the
//! prefixed (`exec_...`) and bare ULID form.

use amber_loom_core::{ExecutionId, ParseIdError, UserId, WorkflowId};
use amber_loom_workflow::execution::WorkflowExecution;
use amber_loom_workflow::{EngineError, ExecutionEngine};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::str::FromStr;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub engine: ExecutionEngine,
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/workflows/{workflow_id}/executions",
            post(start_execution),
        )
        .route("/api/executions/{execution_id}", get(get_execution))
        .route(
            "/api/executions/{execution_id}/cancel",
            post(cancel_execution),
        )
        .route(
            "/api/executions/{execution_id}/nodes/{node_id}/resume",
            post(resume_node),
        )
        .with_state(state)
}

/// Error envelope returned by every API route.
#[derive(Debug)]
enum ApiError {
    /// Malformed id in the path or body.
    BadRequest { message: String },
    /// Unknown workflow or execution.
    NotFound { message: String },
    /// The workflow exists but its definition cannot be executed.
    UnprocessableDefinition { message: String },
    /// Store failure or other internal error; detail stays in the logs.
    Internal { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
            Self::NotFound { message } => (StatusCode::NOT_FOUND, message),
            Self::UnprocessableDefinition { message } => {
                (StatusCode::UNPROCESSABLE_ENTITY, message)
            }
            Self::Internal { message } => {
                tracing::error!(error = %message, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::WorkflowNotFound { .. } | EngineError::ExecutionNotFound { .. } => {
                Self::NotFound {
                    message: e.to_string(),
                }
            }
            EngineError::InvalidDefinition { .. } => Self::UnprocessableDefinition {
                message: e.to_string(),
            },
            EngineError::Store(_) => Self::Internal {
                message: e.to_string(),
            },
        }
    }
}

fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = ParseIdError>,
{
    raw.parse().map_err(|e: ParseIdError| ApiError::BadRequest {
        message: e.to_string(),
    })
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionRequest {
    #[serde(default)]
    input: JsonValue,
    user_id: String,
}

async fn start_execution(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<StartExecutionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let workflow_id: WorkflowId = parse_id(&workflow_id)?;
    let user_id: UserId = parse_id(&request.user_id)?;

    let execution = state
        .engine
        .execute(workflow_id, request.input, user_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let execution_id: ExecutionId = parse_id(&execution_id)?;

    let execution = state
        .engine
        .get_status(execution_id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            message: format!("execution {execution_id} not found"),
        })?;
    Ok(Json(execution))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let execution_id: ExecutionId = parse_id(&execution_id)?;

    let cancelled = state.engine.cancel(execution_id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

#[derive(Debug, Deserialize)]
struct ResumeRequest {
    #[serde(default)]
    response: JsonValue,
}

#[derive(Debug, Serialize)]
struct ResumeResponse {
    delivered: bool,
}

async fn resume_node(
    State(state): State<AppState>,
    Path((execution_id, node_id)): Path<(String, String)>,
    Json(request): Json<ResumeRequest>,
) -> Result<Json<ResumeResponse>, ApiError> {
    let execution_id: ExecutionId = parse_id(&execution_id)?;

    let delivered = state
        .engine
        .resume_node(execution_id, &node_id, request.response)
        .await;
    Ok(Json(ResumeResponse { delivered }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use amber_loom_workflow::definition::{Workflow, WorkflowDefinition};
    use amber_loom_workflow::edge::WorkflowEdge;
    use amber_loom_workflow::execution::{ExecutionStatus, NodeStatus};
    use amber_loom_workflow::invoker::MockInvoker;
    use amber_loom_workflow::node::{NodeConfig, NodeKind, WorkflowNode};
    use amber_loom_workflow::publisher::NullPublisher;
    use amber_loom_workflow::store::{ExecutionStore, InMemoryExecutionStore, InMemoryWorkflowSource};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        store: Arc<InMemoryExecutionStore>,
        workflow_id: WorkflowId,
    }

    async fn harness(workflow: Workflow) -> Harness {
        let source = Arc::new(InMemoryWorkflowSource::new());
        let workflow_id = workflow.id;
        source.insert(workflow).await;

        let store = Arc::new(InMemoryExecutionStore::new());
        let engine = ExecutionEngine::new(
            source,
            store.clone(),
            Arc::new(MockInvoker::succeeding(json!({"handled": true}))),
            Arc::new(MockInvoker::succeeding(json!(null))),
            Arc::new(NullPublisher),
        );

        Harness {
            app: router(AppState { engine }),
            store,
            workflow_id,
        }
    }

    fn linear_workflow() -> Workflow {
        Workflow::new(
            "api-test",
            UserId::new(),
            WorkflowDefinition::new(
                vec![
                    WorkflowNode::new("start", NodeKind::Start),
                    WorkflowNode::new("end", NodeKind::End),
                ],
                vec![WorkflowEdge::new("e1", "start", "end")],
            ),
        )
    }

    fn prompt_workflow() -> Workflow {
        Workflow::new(
            "api-prompt",
            UserId::new(),
            WorkflowDefinition::new(
                vec![
                    WorkflowNode::new("start", NodeKind::Start),
                    WorkflowNode::new("ask", NodeKind::Prompt)
                        .with_config(NodeConfig::new().with_prompt("Approve?")),
                    WorkflowNode::new("end", NodeKind::End),
                ],
                vec![
                    WorkflowEdge::new("e1", "start", "ask"),
                    WorkflowEdge::new("e2", "ask", "end"),
                ],
            ),
        )
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, JsonValue) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn start(h: &Harness) -> ExecutionId {
        let (status, body) = send(
            &h.app,
            post_json(
                &format!("/api/workflows/{}/executions", h.workflow_id),
                json!({"input": {"subject": "invoice"}, "userId": UserId::new().to_string()}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        body["id"].as_str().unwrap().parse().unwrap()
    }

    async fn wait_terminal(
        store: &InMemoryExecutionStore,
        execution_id: ExecutionId,
    ) -> WorkflowExecution {
        for _ in 0..400 {
            if let Some(execution) = store.fetch(execution_id).await.unwrap()
                && execution.status.is_terminal()
            {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution never reached a terminal status");
    }

    async fn wait_node_status(
        store: &InMemoryExecutionStore,
        execution_id: ExecutionId,
        node_id: &str,
        status: NodeStatus,
    ) {
        for _ in 0..400 {
            if let Some(execution) = store.fetch(execution_id).await.unwrap()
                && execution.get_node(node_id).is_some_and(|n| n.status == status)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("node '{node_id}' never reached {status:?}");
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let h = harness(linear_workflow()).await;
        let (status, _) = send(&h.app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn start_execution_returns_accepted_pending_aggregate() {
        let h = harness(linear_workflow()).await;
        let (status, body) = send(
            &h.app,
            post_json(
                &format!("/api/workflows/{}/executions", h.workflow_id),
                json!({"input": {"a": 1}, "userId": UserId::new().to_string()}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], json!("pending"));
        assert_eq!(body["input"], json!({"a": 1}));
        assert!(body["id"].as_str().is_some());
    }

    #[tokio::test]
    async fn start_execution_for_unknown_workflow_is_404() {
        let h = harness(linear_workflow()).await;
        let (status, body) = send(
            &h.app,
            post_json(
                &format!("/api/workflows/{}/executions", WorkflowId::new()),
                json!({"input": {}, "userId": UserId::new().to_string()}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn invalid_definition_is_rejected_without_an_execution() {
        // No START node, so the engine refuses before creating state.
        let h = harness(Workflow::new(
            "broken",
            UserId::new(),
            WorkflowDefinition::new(
                vec![WorkflowNode::new("end", NodeKind::End)],
                Vec::new(),
            ),
        ))
        .await;

        let (status, body) = send(
            &h.app,
            post_json(
                &format!("/api/workflows/{}/executions", h.workflow_id),
                json!({"input": {}, "userId": UserId::new().to_string()}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("START"));
        assert_eq!(h.store.count().await, 0);
    }

    #[tokio::test]
    async fn get_execution_returns_the_stored_aggregate() {
        let h = harness(linear_workflow()).await;
        let execution_id = start(&h).await;
        wait_terminal(&h.store, execution_id).await;

        let (status, body) =
            send(&h.app, get_request(&format!("/api/executions/{execution_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("completed"));
        assert_eq!(body["output"], json!({"subject": "invoice"}));
    }

    #[tokio::test]
    async fn unknown_execution_is_404() {
        let h = harness(linear_workflow()).await;
        let (status, _) = send(
            &h.app,
            get_request(&format!("/api/executions/{}", ExecutionId::new())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_execution_id_is_400() {
        let h = harness(linear_workflow()).await;
        let (status, body) = send(&h.app, get_request("/api/executions/not-a-ulid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("ExecutionId"));
    }

    #[tokio::test]
    async fn cancelling_a_finished_execution_reports_false() {
        let h = harness(linear_workflow()).await;
        let execution_id = start(&h).await;
        wait_terminal(&h.store, execution_id).await;

        let (status, body) = send(
            &h.app,
            post_json(&format!("/api/executions/{execution_id}/cancel"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"cancelled": false}));
    }

    #[tokio::test]
    async fn resume_with_no_waiter_reports_false() {
        let h = harness(linear_workflow()).await;
        let execution_id = start(&h).await;
        wait_terminal(&h.store, execution_id).await;

        let (status, body) = send(
            &h.app,
            post_json(
                &format!("/api/executions/{execution_id}/nodes/ask/resume"),
                json!({"response": "yes"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"delivered": false}));
    }

    #[tokio::test]
    async fn prompt_suspends_and_resumes_over_the_api() {
        let h = harness(prompt_workflow()).await;
        let execution_id = start(&h).await;
        wait_node_status(&h.store, execution_id, "ask", NodeStatus::WaitingInput).await;

        let (status, body) = send(
            &h.app,
            post_json(
                &format!("/api/executions/{execution_id}/nodes/ask/resume"),
                json!({"response": "yes"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"delivered": true}));

        let finished = wait_terminal(&h.store, execution_id).await;
        assert_eq!(finished.status, ExecutionStatus::Completed);
        let ask = finished.get_node("ask").unwrap();
        assert_eq!(
            ask.output,
            Some(json!({"prompt": "Approve?", "response": "yes"}))
        );
    }
}
