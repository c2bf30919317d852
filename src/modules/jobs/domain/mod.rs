pub mod entities;
pub mod repository;
pub mod value_objects;

pub use entities::{EntityRef, FailOutcome, Job, JobDescriptor, JobOptions, JobRecord};
pub use repository::{JobLink, JobRepository, JobStatistics};
pub use value_objects::{JobStatus, QueueMode};
