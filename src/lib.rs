pub mod engine;
pub mod modules;
pub mod shared;

pub use engine::Engine;
pub use shared::{AppError, AppResult, EngineConfig};
