pub mod agents_manager;

pub use agents_manager::{AgentFailure, AgentResult, AgentsManager, FanOutReport};
