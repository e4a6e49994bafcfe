//! Axum routes for the branch tree service.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::registry::BranchError;
use crate::store::PostgresStore;
use crate::tree::TreeExport;
use crate::types::{BranchComparison, BranchSummary};
use crate::BRANCH_KERNEL_SCHEMA_VERSION;

use super::middleware::record_mutation;
use super::state::ServiceState;

/// Type alias for the service state backed by PostgreSQL.
pub type AppState = ServiceState<PostgresStore, PostgresStore>;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to fork a conversation into a new branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBranchRequest {
    /// Branch name, unique per conversation (case-sensitive).
    pub name: String,
    /// 1-indexed branch point; omitted means all current messages.
    pub from_message_index: Option<usize>,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Optional parent branch name within the same conversation.
    pub parent_branch_name: Option<String>,
}

/// Response after creating a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBranchResponse {
    /// Generated branch id.
    pub branch_id: String,
    /// Branch name as created.
    pub name: String,
}

/// Query parameters for branch listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListBranchesQuery {
    /// Include archived branches (default: false).
    #[serde(default)]
    pub include_inactive: bool,
}

/// Branch listing for a conversation, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchListResponse {
    /// Conversation the branches belong to.
    pub conversation_id: String,
    /// Branches ordered by creation time descending.
    pub branches: Vec<BranchSummary>,
}

/// Request to rename a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameBranchRequest {
    /// The new branch name.
    pub new_name: String,
}

/// Boolean outcome of rename/archive/delete/set-current operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// Whether the operation changed anything.
    pub success: bool,
}

/// Query parameters for branch deletion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteBranchQuery {
    /// Cascade to all descendant branches (default: false).
    #[serde(default)]
    pub force: bool,
}

/// Query parameters for tree visualization.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeQuery {
    /// Output format: `ascii` or `json` (default: ascii).
    #[serde(default = "default_tree_format")]
    pub format: String,
}

fn default_tree_format() -> String {
    "ascii".to_string()
}

/// Rendered tree visualization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeResponse {
    /// Conversation the tree belongs to.
    pub conversation_id: String,
    /// Format the tree was rendered in.
    pub format: String,
    /// The rendered tree.
    pub rendered: String,
}

/// Query parameters for branch comparison.
#[derive(Debug, Clone, Deserialize)]
pub struct CompareQuery {
    /// First branch name.
    pub branch1: String,
    /// Second branch name.
    pub branch2: String,
}

/// Root-to-branch path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchPathResponse {
    /// Branch names from a root to the requested branch, inclusive.
    pub path: Vec<String>,
}

/// The conversation's current branch, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentBranchResponse {
    /// Current branch summary, or `null` when none is set.
    pub branch: Option<BranchSummary>,
}

/// Request to point the current branch at a named branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCurrentBranchRequest {
    /// Branch name to make current.
    pub name: String,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub schema_version: String,
    /// Database connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseHealth>,
}

/// Database health information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub pool_size: u32,
    pub pool_idle: usize,
    pub pool_max: u32,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
    pub details: Option<String>,
}

/// Structured error response with correlation ID for tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Correlation ID for request tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            correlation_id: None,
            details: None,
        }
    }

    /// Add a correlation ID to the error.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        tracing::warn!(
            code = %self.code,
            error = %self.error,
            correlation_id = ?self.correlation_id,
            "Request error"
        );
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

/// Map a kernel error onto an HTTP status and structured body.
fn error_reply(e: BranchError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &e {
        BranchError::ConversationNotFound(_) => (StatusCode::NOT_FOUND, "CONVERSATION_NOT_FOUND"),
        BranchError::BranchNotFound(_) => (StatusCode::NOT_FOUND, "BRANCH_NOT_FOUND"),
        BranchError::AlreadyExists(_) => (StatusCode::CONFLICT, "BRANCH_EXISTS"),
        BranchError::InvalidMessageIndex { .. } => {
            (StatusCode::BAD_REQUEST, "INVALID_MESSAGE_INDEX")
        }
        BranchError::HasChildren(_) => (StatusCode::CONFLICT, "BRANCH_HAS_CHILDREN"),
        BranchError::InvalidFormat(_) => (StatusCode::BAD_REQUEST, "INVALID_FORMAT"),
        BranchError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
    };
    (status, Json(ErrorResponse::new(code, e.to_string())))
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Fork a conversation into a new branch.
async fn create_branch_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(request): Json<CreateBranchRequest>,
) -> Result<(StatusCode, Json<CreateBranchResponse>), (StatusCode, Json<ErrorResponse>)> {
    let branch_id = state
        .registry()
        .create_branch(
            &conversation_id,
            &request.name,
            request.from_message_index,
            request.description.as_deref(),
            request.parent_branch_name.as_deref(),
        )
        .await
        .map_err(error_reply)?;

    record_mutation("create", true);
    Ok((
        StatusCode::CREATED,
        Json(CreateBranchResponse {
            branch_id: branch_id.to_string(),
            name: request.name,
        }),
    ))
}

/// List a conversation's branches, newest first.
async fn list_branches_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<ListBranchesQuery>,
) -> Result<Json<BranchListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let branches = state
        .registry()
        .list_branches(&conversation_id, query.include_inactive)
        .await
        .map_err(error_reply)?;

    Ok(Json(BranchListResponse { conversation_id, branches }))
}

/// Show one branch, annotated with its message count.
async fn get_branch_handler(
    State(state): State<Arc<AppState>>,
    Path((conversation_id, name)): Path<(String, String)>,
) -> Result<Json<BranchSummary>, (StatusCode, Json<ErrorResponse>)> {
    let branch = state
        .registry()
        .get_branch(&conversation_id, &name)
        .await
        .map_err(error_reply)?;

    match branch {
        Some(branch) => Ok(Json(branch)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("BRANCH_NOT_FOUND", format!("Branch not found: {name}"))),
        )),
    }
}

/// Rename a branch.
async fn rename_branch_handler(
    State(state): State<Arc<AppState>>,
    Path((conversation_id, name)): Path<(String, String)>,
    Json(request): Json<RenameBranchRequest>,
) -> Result<Json<UpdateResponse>, (StatusCode, Json<ErrorResponse>)> {
    let success = state
        .registry()
        .rename_branch(&conversation_id, &name, &request.new_name)
        .await
        .map_err(error_reply)?;
    record_mutation("rename", success);
    Ok(Json(UpdateResponse { success }))
}

/// Archive a branch.
async fn archive_branch_handler(
    State(state): State<Arc<AppState>>,
    Path((conversation_id, name)): Path<(String, String)>,
) -> Result<Json<UpdateResponse>, (StatusCode, Json<ErrorResponse>)> {
    let success = state
        .registry()
        .archive_branch(&conversation_id, &name)
        .await
        .map_err(error_reply)?;
    record_mutation("archive", success);
    Ok(Json(UpdateResponse { success }))
}

/// Delete a branch, cascading to descendants when forced.
async fn delete_branch_handler(
    State(state): State<Arc<AppState>>,
    Path((conversation_id, name)): Path<(String, String)>,
    Query(query): Query<DeleteBranchQuery>,
) -> Result<Json<UpdateResponse>, (StatusCode, Json<ErrorResponse>)> {
    let success = state
        .registry()
        .delete_branch(&conversation_id, &name, query.force)
        .await
        .map_err(error_reply)?;
    record_mutation("delete", success);
    Ok(Json(UpdateResponse { success }))
}

/// Render the conversation's branch tree.
async fn tree_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<TreeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let rendered = state
        .navigator()
        .visualize(&conversation_id, &query.format)
        .await
        .map_err(error_reply)?;

    Ok(Json(TreeResponse {
        conversation_id,
        format: query.format,
        rendered,
    }))
}

/// Export the conversation's branch tree as structured JSON.
async fn tree_export_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<TreeExport>, (StatusCode, Json<ErrorResponse>)> {
    let tree = state
        .tree_builder()
        .build(&conversation_id)
        .await
        .map_err(error_reply)?;
    Ok(Json(TreeExport::from_tree(&tree)))
}

/// Compare two branches of the same conversation.
async fn compare_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<BranchComparison>, (StatusCode, Json<ErrorResponse>)> {
    let comparison = state
        .navigator()
        .compare(&conversation_id, &query.branch1, &query.branch2)
        .await
        .map_err(error_reply)?;
    Ok(Json(comparison))
}

/// Path of branch names from a root to the named branch.
async fn branch_path_handler(
    State(state): State<Arc<AppState>>,
    Path((conversation_id, name)): Path<(String, String)>,
) -> Result<Json<BranchPathResponse>, (StatusCode, Json<ErrorResponse>)> {
    let path = state
        .navigator()
        .branch_path(&conversation_id, &name)
        .await
        .map_err(error_reply)?;
    Ok(Json(BranchPathResponse { path }))
}

/// Fetch the conversation's current branch.
async fn current_branch_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<CurrentBranchResponse>, (StatusCode, Json<ErrorResponse>)> {
    let branch = state
        .registry()
        .current_branch(&conversation_id)
        .await
        .map_err(error_reply)?;
    Ok(Json(CurrentBranchResponse { branch }))
}

/// Point the conversation's current branch at a named branch.
async fn set_current_branch_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(request): Json<SetCurrentBranchRequest>,
) -> Result<Json<UpdateResponse>, (StatusCode, Json<ErrorResponse>)> {
    let success = state
        .registry()
        .set_current_branch(&conversation_id, &request.name)
        .await
        .map_err(error_reply)?;
    record_mutation("set_current", success);
    Ok(Json(UpdateResponse { success }))
}

/// Health check endpoint (detailed).
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db_healthy = state.branches.is_healthy().await;
    let pool_stats = state.branches.pool_stats();

    Json(HealthResponse {
        status: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: BRANCH_KERNEL_SCHEMA_VERSION.to_string(),
        database: Some(DatabaseHealth {
            connected: db_healthy,
            pool_size: pool_stats.size,
            pool_idle: pool_stats.idle,
            pool_max: pool_stats.max,
        }),
    })
}

/// Liveness probe endpoint.
///
/// Simple check that the service is running. Does NOT check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive".to_string() })
}

/// Readiness probe endpoint.
///
/// Returns 200 if the database is connected, 503 otherwise.
async fn readiness_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let db_healthy = state.branches.is_healthy().await;

    if db_healthy {
        Ok(Json(ReadinessResponse {
            ready: true,
            database: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                database: false,
                details: Some("Database connection failed".to_string()),
            }),
        ))
    }
}

/// Startup probe endpoint.
async fn startup_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let db_healthy = state.branches.is_healthy().await;

    if db_healthy {
        Ok(Json(ReadinessResponse {
            ready: true,
            database: true,
            details: Some("Service started successfully".to_string()),
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                database: false,
                details: Some("Database not yet available".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the branch tree service.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Branch lifecycle
        .route(
            "/api/conversations/:conversation_id/branches",
            post(create_branch_handler).get(list_branches_handler),
        )
        .route(
            "/api/conversations/:conversation_id/branches/:name",
            get(get_branch_handler).delete(delete_branch_handler),
        )
        .route(
            "/api/conversations/:conversation_id/branches/:name/rename",
            post(rename_branch_handler),
        )
        .route(
            "/api/conversations/:conversation_id/branches/:name/archive",
            post(archive_branch_handler),
        )
        .route(
            "/api/conversations/:conversation_id/branches/:name/path",
            get(branch_path_handler),
        )
        // Tree queries
        .route("/api/conversations/:conversation_id/tree", get(tree_handler))
        .route(
            "/api/conversations/:conversation_id/tree/export",
            get(tree_export_handler),
        )
        .route("/api/conversations/:conversation_id/compare", get(compare_handler))
        // Current branch pointer
        .route(
            "/api/conversations/:conversation_id/current-branch",
            get(current_branch_handler).put(set_current_branch_handler),
        )
        // Health checks
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/health/startup", get(startup_handler))
        .with_state(state)
}
