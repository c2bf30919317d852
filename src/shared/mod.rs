// Shared kernel: configuration, errors and cross-cutting utilities

pub mod config; // Environment-driven engine configuration
pub mod errors; // Shared error types
pub mod utils; // Logging helpers

pub use config::EngineConfig;
pub use errors::{AppError, AppResult};
