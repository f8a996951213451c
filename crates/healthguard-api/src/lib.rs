//! HTTP front end: starts research runs and streams their progress as SSE.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
