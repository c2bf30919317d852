pub mod lanes;
pub mod manager;
#[allow(clippy::module_inception)]
pub mod queue;

pub use lanes::{LaneSizes, Lanes};
pub use manager::QueueManager;
pub use queue::{DrainReport, Queue, QueueConfig, QueueSnapshot, RecoveryReport, TickReport};
