//! Branch Tree REST Service
//!
//! Exposes the branch kernel as a REST API for an out-of-scope CLI/API
//! layer.
//!
//! ## Endpoints
//!
//! - `POST /api/conversations/:id/branches` - Fork a new branch
//! - `GET /api/conversations/:id/branches` - List branches (newest first)
//! - `GET /api/conversations/:id/branches/:name` - Show one branch
//! - `DELETE /api/conversations/:id/branches/:name` - Delete (optionally `?force=true`)
//! - `POST /api/conversations/:id/branches/:name/rename` - Rename
//! - `POST /api/conversations/:id/branches/:name/archive` - Archive
//! - `GET /api/conversations/:id/branches/:name/path` - Root-to-branch path
//! - `GET /api/conversations/:id/tree` - Visualize (ascii or json)
//! - `GET /api/conversations/:id/tree/export` - Structured forest export
//! - `GET /api/conversations/:id/compare` - Compare two branches
//! - `GET`/`PUT /api/conversations/:id/current-branch` - Current branch pointer
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health/startup` - Startup probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_mutation};
pub use routes::{create_router, AppState, ErrorResponse};
pub use state::ServiceState;
