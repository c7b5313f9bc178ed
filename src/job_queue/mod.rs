//! Keyed job queue
//!
//! Coordinates in-process job execution:
//! - jobs sharing a queue key run one at a time, in submission order
//! - jobs on different keys run concurrently, bounded by a global limit
//! - jobs can be looked up, dequeued, waited for and killed by identity
//!
//! The subsystem is built around these components:
//! - `JobQueue`: the coordinator owning all scheduling state
//! - `ExecutionGate`: process-wide switch freezing admissions and promotions
//! - `ConcurrencyLimit`: live-adjustable cap on concurrently executing keys
//! - `QueueMetricsSink`: receiver of counts and outcomes after each transition

pub mod coordinator;
pub mod gate;
pub mod limit;
pub mod metrics;
pub mod types;
mod worker;

pub use coordinator::{JobQueue, JobQueueBuilder};
pub use gate::ExecutionGate;
pub use limit::ConcurrencyLimit;
pub use metrics::{LogMetricsSink, NoopMetricsSink, QueueMetricsSink};
pub use types::*;
