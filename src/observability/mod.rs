use crate::job_queue::{JobOutcome, QueueCounts, QueueMetricsSink};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Gauge, Histogram, Meter, MeterProvider},
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::time::Duration;
use tracing::info;

/// OpenTelemetry instruments for the job queue
#[derive(Clone)]
pub struct QueueObservability {
    pub meter: Meter,

    pub executing_jobs: Gauge<u64>,
    pub queued_jobs: Gauge<u64>,
    pub jobs_finished: Counter<u64>,
    pub job_duration: Histogram<f64>,
}

impl QueueObservability {
    /// Install a meter provider and build the queue instruments
    pub fn new(service_name: &'static str) -> Self {
        let provider = SdkMeterProvider::builder().build();
        global::set_meter_provider(provider.clone());

        let meter = provider.meter(service_name);
        info!("OpenTelemetry metrics configured for {}", service_name);

        Self::build_with_instruments(meter)
    }

    /// Build instruments on an existing meter
    pub fn build_with_instruments(meter: Meter) -> Self {
        let executing_jobs = meter
            .u64_gauge("job_queue_executing")
            .with_description("Jobs currently executing, one per busy queue key")
            .build();
        let queued_jobs = meter
            .u64_gauge("job_queue_queued")
            .with_description("Jobs waiting in the backlog")
            .build();
        let jobs_finished = meter
            .u64_counter("job_queue_jobs_finished_total")
            .with_description("Finished jobs by outcome")
            .build();
        let job_duration = meter
            .f64_histogram("job_queue_job_duration_seconds")
            .with_description("Time from worker start to completion")
            .build();

        Self {
            meter,
            executing_jobs,
            queued_jobs,
            jobs_finished,
            job_duration,
        }
    }
}

impl QueueMetricsSink for QueueObservability {
    fn record_counts(&self, counts: QueueCounts) {
        self.executing_jobs.record(counts.executing as u64, &[]);
        self.queued_jobs.record(counts.queued as u64, &[]);
    }

    fn record_outcome(&self, outcome: JobOutcome, elapsed: Duration) {
        let attributes = [KeyValue::new("outcome", outcome.as_str())];
        self.jobs_finished.add(1, &attributes);
        self.job_duration.record(elapsed.as_secs_f64(), &attributes);
    }
}
