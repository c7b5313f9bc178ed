/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Job queue defaults
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 0; // unbounded
pub const DEFAULT_EXECUTION_ENABLED: bool = true;
pub const DEFAULT_SHUTDOWN_TIMEOUT: &str = "30s";

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Environment
pub const ENV_PREFIX: &str = "KEYED_JOB_QUEUE_";
/// Concurrency override kept for deployments configured by environment only
pub const ENV_MAX_CONCURRENT_JOBS: &str = "MAX_CONCURRENT_JOBS";
