//! Prometheus metrics for the scheduler.
//!
//! Each [`SchedulerMetrics`] owns its own [`Registry`], so several managers
//! (and tests) can coexist in one process without name collisions.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

const NAMESPACE: &str = "chainsched";
const SUBSYSTEM: &str = "event_scheduler";

#[derive(Clone)]
pub struct SchedulerMetrics {
    registry: Registry,
    /// Trigger logs seen by workers (removed logs excluded).
    pub events_detected: IntCounter,
    /// Events whose action completed.
    pub events_processed: IntCounter,
    /// Events skipped by duplicate suppression.
    pub events_duplicate: IntCounter,
    pub jobs_scheduled: IntCounter,
    /// Events whose action failed.
    pub jobs_failed: IntCounter,
    /// Workers currently in the registry.
    pub jobs_running: IntGauge,
    pub workers_started: IntCounter,
    pub workers_stopped: IntCounter,
    /// Failed poll ticks.
    pub worker_errors: IntCounter,
    pub schedule_rejections: IntCounter,
    /// Connection attempts at startup, by `chain_id` and `status`.
    pub chain_connections: IntCounterVec,
    /// Worker RPC calls, by `chain_id`, `method` and `status`.
    pub rpc_requests: IntCounterVec,
    /// Dispatched actions, by `job_id` and `status`.
    pub action_executions: IntCounterVec,
    /// Detection-to-outcome time of each non-duplicate event.
    pub event_processing_seconds: Histogram,
}

impl SchedulerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_detected = counter(&registry, "events_detected_total", "Trigger events detected")?;
        let events_processed =
            counter(&registry, "events_processed_total", "Trigger events whose action completed")?;
        let events_duplicate =
            counter(&registry, "events_duplicate_total", "Trigger events skipped as duplicates")?;
        let jobs_scheduled = counter(&registry, "jobs_scheduled_total", "Jobs scheduled")?;
        let jobs_failed = counter(&registry, "jobs_failed_total", "Job actions that failed")?;
        let jobs_running = gauge(&registry, "jobs_running", "Jobs with a registered worker")?;
        let workers_started = counter(&registry, "workers_started_total", "Worker loops started")?;
        let workers_stopped = counter(&registry, "workers_stopped_total", "Workers stopped")?;
        let worker_errors = counter(&registry, "worker_errors_total", "Failed worker poll ticks")?;
        let schedule_rejections =
            counter(&registry, "schedule_rejections_total", "Rejected schedule requests")?;
        let chain_connections = counter_vec(
            &registry,
            "chain_connections_total",
            "Blockchain connection attempts",
            &["chain_id", "status"],
        )?;
        let rpc_requests = counter_vec(
            &registry,
            "rpc_requests_total",
            "RPC requests to blockchain nodes",
            &["chain_id", "method", "status"],
        )?;
        let action_executions = counter_vec(
            &registry,
            "action_executions_total",
            "Action executions triggered by events",
            &["job_id", "status"],
        )?;

        let event_processing_seconds = Histogram::with_opts(
            HistogramOpts::new("event_processing_duration_seconds", "Event processing time")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM)
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(event_processing_seconds.clone()))?;

        Ok(Self {
            registry,
            events_detected,
            events_processed,
            events_duplicate,
            jobs_scheduled,
            jobs_failed,
            jobs_running,
            workers_started,
            workers_stopped,
            worker_errors,
            schedule_rejections,
            chain_connections,
            rpc_requests,
            action_executions,
            event_processing_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, prometheus::Error> {
    let counter = IntCounterVec::new(
        Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM),
        labels,
    )?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_registries() {
        let a = SchedulerMetrics::new().unwrap();
        let b = SchedulerMetrics::new().unwrap();
        a.jobs_scheduled.inc();
        assert_eq!(a.jobs_scheduled.get(), 1);
        assert_eq!(b.jobs_scheduled.get(), 0);
    }

    #[test]
    fn render_includes_namespaced_names() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.jobs_running.set(3);
        let text = metrics.render().unwrap();
        assert!(text.contains("chainsched_event_scheduler_jobs_running 3"));
        assert!(text.contains("chainsched_event_scheduler_events_detected_total 0"));
    }

    #[test]
    fn labelled_series_render_per_label_set() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics
            .rpc_requests
            .with_label_values(&["1", "eth_blockNumber", "success"])
            .inc_by(2);
        metrics
            .rpc_requests
            .with_label_values(&["10", "eth_getLogs", "failed"])
            .inc();
        metrics.action_executions.with_label_values(&["7", "completed"]).inc();
        metrics.event_processing_seconds.observe(0.2);

        let text = metrics.render().unwrap();
        assert!(text.contains(
            r#"chainsched_event_scheduler_rpc_requests_total{chain_id="1",method="eth_blockNumber",status="success"} 2"#
        ));
        assert!(text.contains(
            r#"chainsched_event_scheduler_rpc_requests_total{chain_id="10",method="eth_getLogs",status="failed"} 1"#
        ));
        assert!(text.contains(
            r#"chainsched_event_scheduler_action_executions_total{job_id="7",status="completed"} 1"#
        ));
        assert!(text.contains("chainsched_event_scheduler_event_processing_duration_seconds_count 1"));
    }
}
