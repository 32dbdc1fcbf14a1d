//! HTTP management API
//!
//! A thin translation layer over the agent manager and supervisor:
//! deserialize JSON, invoke the typed operation, serialize the result. Long
//! operations return immediately with a job ID for the client to poll.
//! Every non-2xx response carries the error envelope
//! `{"error": {"type", "code", "message"}}`.

use crate::agent::{AgentRole, AgentStats};
use crate::config::{AgentConfig, SystemConfig, SystemSettings};
use crate::data::{AgentData, FunctionResult};
use crate::domain_types::{AgentId, JobId};
use crate::error::AgentError;
use crate::jobs::JobStatus;
use crate::manager::AgentManager;
use crate::supervisor::{Supervisor, SystemStatus};
use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared state behind every handler
#[derive(Clone)]
pub struct ApiState {
    /// The process-wide agent registry
    pub manager: Arc<AgentManager>,
    /// The supervisory loop, for status snapshots
    pub supervisor: Arc<Supervisor>,
    /// Configuration file backing `/v1/system/reload`
    pub config_path: Option<PathBuf>,
    /// Server-side request deadline
    pub request_timeout: Duration,
}

/// Error envelope body for non-2xx responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error payload
    pub error: ErrorBody,
}

/// Inner error payload
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable tag
    #[serde(rename = "type")]
    pub error_type: String,
    /// HTTP status code
    pub code: u16,
    /// Human-readable message
    pub message: String,
}

struct ApiError(AgentError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::State(_) => StatusCode::CONFLICT,
            AgentError::Dependency { .. } => StatusCode::BAD_GATEWAY,
            AgentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AgentError::Internal(_) | AgentError::Io(_) | AgentError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                error_type: self.0.kind().to_string(),
                code: status.as_u16(),
                message: self.0.to_string(),
            },
        };
        (status, Json(envelope)).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        Self(error)
    }
}

/// Summary row for the agent listing
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Agent ID
    pub id: AgentId,
    /// Agent name
    pub name: String,
    /// Free-form type tag
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Role
    pub role: AgentRole,
    /// Whether the agent is running
    pub running: bool,
    /// Capability tags
    pub capabilities: Vec<String>,
}

/// Full agent detail
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Summary fields
    #[serde(flatten)]
    pub summary: AgentSummary,
    /// Registered function names
    pub functions: Vec<String>,
    /// Statistics snapshot
    pub stats: AgentStats,
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateAgentResponse {
    agent_id: AgentId,
}

#[derive(Debug, Serialize, Deserialize)]
struct OkResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    function: String,
    #[serde(default)]
    params: AgentData,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExecuteResponse {
    job_id: JobId,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobResponse {
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<FunctionResult>,
}

#[derive(Debug, Deserialize)]
struct ReloadRequest {
    #[serde(default)]
    config_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReloadResponse {
    reloaded: bool,
}

fn parse_agent_id(raw: &str) -> Result<AgentId, ApiError> {
    AgentId::parse(raw)
        .map_err(|_| ApiError(AgentError::Validation(format!("invalid agent id '{raw}'"))))
}

async fn list_agents(State(state): State<ApiState>) -> Json<Vec<AgentSummary>> {
    let mut agents: Vec<AgentSummary> = state
        .manager
        .list_agents()
        .iter()
        .map(|agent| AgentSummary {
            id: agent.id(),
            name: agent.name(),
            agent_type: agent.agent_type().to_string(),
            role: agent.role(),
            running: agent.is_running(),
            capabilities: agent.capabilities(),
        })
        .collect();
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    Json(agents)
}

async fn create_agent(
    State(state): State<ApiState>,
    Json(config): Json<AgentConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let agent_id = state.manager.create_agent_from_config(&config)?;
    Ok((StatusCode::CREATED, Json(CreateAgentResponse { agent_id })))
}

async fn get_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<AgentInfo>, ApiError> {
    let id = parse_agent_id(&id)?;
    let agent = state
        .manager
        .get_agent(id)
        .ok_or_else(|| ApiError(AgentError::NotFound(format!("agent {id}"))))?;

    Ok(Json(AgentInfo {
        summary: AgentSummary {
            id: agent.id(),
            name: agent.name(),
            agent_type: agent.agent_type().to_string(),
            role: agent.role(),
            running: agent.is_running(),
            capabilities: agent.capabilities(),
        },
        functions: agent.registry().names(),
        stats: agent.statistics(),
    }))
}

async fn start_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    let id = parse_agent_id(&id)?;
    state.manager.start_agent(id).await?;
    Ok(Json(OkResponse {
        status: "ok".to_string(),
    }))
}

async fn stop_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    let id = parse_agent_id(&id)?;
    state.manager.stop_agent(id).await?;
    Ok(Json(OkResponse {
        status: "ok".to_string(),
    }))
}

async fn delete_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_agent_id(&id)?;
    state.manager.delete_agent(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn execute_function(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_agent_id(&id)?;
    let agent = state
        .manager
        .get_agent(id)
        .ok_or_else(|| ApiError(AgentError::NotFound(format!("agent {id}"))))?;

    let job_id = agent
        .execute_function_async(&request.function, request.params, request.priority)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ExecuteResponse { job_id })))
}

async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = JobId::parse(&id)
        .map_err(|_| ApiError(AgentError::Validation(format!("invalid job id '{id}'"))))?;
    let agent = state
        .manager
        .find_job_owner(job_id)
        .await
        .ok_or_else(|| ApiError(AgentError::NotFound(format!("job {job_id}"))))?;

    let status = agent.job_status(job_id).await?;
    let result = if status.is_terminal() {
        Some(agent.job_result(job_id).await?)
    } else {
        None
    };
    Ok(Json(JobResponse { status, result }))
}

async fn system_status(State(state): State<ApiState>) -> Json<SystemStatus> {
    Json(state.supervisor.compute_status().await)
}

async fn system_reload(
    State(state): State<ApiState>,
    Json(request): Json<ReloadRequest>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let path = request
        .config_path
        .map(PathBuf::from)
        .or_else(|| state.config_path.clone())
        .ok_or_else(|| {
            ApiError(AgentError::Validation(
                "no configuration path available for reload".to_string(),
            ))
        })?;

    let config = SystemConfig::from_file(&path)?;
    let report = state.manager.reload_configuration(&config).await;
    info!(
        created = report.created,
        started = report.started,
        "configuration reloaded via API"
    );
    Ok(Json(ReloadResponse { reloaded: true }))
}

/// Applies the server-side deadline; exceeding it returns 504 with the
/// error envelope and best-effort abandons the downstream work
async fn deadline_middleware(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let timeout = state.request_timeout;
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("request exceeded the server-side deadline");
            ApiError(AgentError::Timeout(timeout)).into_response()
        }
    }
}

fn cors_layer(settings: &SystemSettings) -> CorsLayer {
    if settings.cors_allowed_origins.is_empty() {
        // permissive by default; preflight OPTIONS is answered automatically
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = settings
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Builds the management router with all routes and middleware
pub fn create_router(state: ApiState, settings: &SystemSettings) -> Router {
    Router::new()
        .route("/v1/agents", get(list_agents).post(create_agent))
        .route("/v1/agents/{id}", get(get_agent).delete(delete_agent))
        .route("/v1/agents/{id}/start", put(start_agent))
        .route("/v1/agents/{id}/stop", put(stop_agent))
        .route("/v1/agents/{id}/execute", post(execute_function))
        .route("/v1/jobs/{job_id}", get(get_job))
        .route("/v1/system/status", get(system_status))
        .route("/v1/system/reload", post(system_reload))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            deadline_middleware,
        ))
        .layer(cors_layer(settings))
        .with_state(state)
}

/// Binds the management listener
///
/// # Errors
///
/// Returns an error when the address cannot be bound.
pub async fn bind(host: &str, port: u16) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

/// Serves the router until the shutdown token fires
///
/// # Errors
///
/// Returns an error when the server fails while running.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let signal = async move {
        shutdown.cancelled().await;
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await
}
