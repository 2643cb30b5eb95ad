//! HTTP API.
//!
//! Routes are nested under `/api/`. `api_router()` returns a composable
//! `Router`; `server` owns the listener lifecycle.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer, ServerError};
pub use types::ApiContext;
