pub mod config;
pub mod errors;
pub mod job_queue;
pub mod jobs;
pub mod observability;
