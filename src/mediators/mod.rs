pub mod inference_worker;
pub mod job_submitter;
pub mod metrics_aggregator;
pub mod recovery_sweeper;
