//! HTTP surface.
//!
//! Validates client requests and hands them to the selected provider.

mod handlers;
mod server;
pub mod types;

pub use server::{build_http_client, create_router, run_server, AppState};
pub use types::{ModelsQuery, PromptRequest};
