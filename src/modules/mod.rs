pub mod agents;
pub mod jobs;
pub mod library;
