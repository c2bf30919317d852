pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod traits;

// Re-exports for easy external access
pub use application::{AgentFailure, AgentResult, AgentsManager, FanOutReport};
pub use domain::{Capabilities, Capability, EntityKind, MangaRecord, SearchQuery};
pub use infrastructure::ManagedAgent;
pub use traits::{Agent, Pagination, RateLimitConfig, RawPage, RawRequest};
