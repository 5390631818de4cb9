//! HTTP service streaming spoken meditations while the script is still being
//! written.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod prompt;
pub mod routes;
pub mod state;
pub mod validation;

pub use config::ServerConfig;
pub use routes::api_router;
pub use state::AppState;
