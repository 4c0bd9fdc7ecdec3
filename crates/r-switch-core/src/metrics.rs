//! ---
//! ems_section: "04-device-control"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device registry, transports and status reconciliation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use prometheus::{IntCounterVec, Opts, Registry};

/// Counters published by the request executor.
#[derive(Clone)]
pub struct TransportMetrics {
    requests_total: IntCounterVec,
    retries_total: IntCounterVec,
    offline_total: IntCounterVec,
}

impl TransportMetrics {
    /// Register the transport metric family against the provided registry.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new(
                "r_switch_transport_requests_total",
                "Device requests completed, by protocol and outcome",
            ),
            &["protocol", "outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let retries_total = IntCounterVec::new(
            Opts::new(
                "r_switch_transport_retries_total",
                "Requests retried after a response timeout",
            ),
            &["protocol"],
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        let offline_total = IntCounterVec::new(
            Opts::new(
                "r_switch_transport_offline_total",
                "Requests skipped because the liveness probe failed",
            ),
            &["protocol"],
        )?;
        registry.register(Box::new(offline_total.clone()))?;

        Ok(Self {
            requests_total,
            retries_total,
            offline_total,
        })
    }

    pub fn record_request(&self, protocol: &str, outcome: &str) {
        self.requests_total
            .with_label_values(&[protocol, outcome])
            .inc();
    }

    pub fn record_retry(&self, protocol: &str) {
        self.retries_total.with_label_values(&[protocol]).inc();
    }

    pub fn record_offline(&self, protocol: &str) {
        self.offline_total.with_label_values(&[protocol]).inc();
    }

    pub fn requests(&self, protocol: &str, outcome: &str) -> u64 {
        self.requests_total
            .with_label_values(&[protocol, outcome])
            .get()
    }

    pub fn retries(&self, protocol: &str) -> u64 {
        self.retries_total.with_label_values(&[protocol]).get()
    }

    pub fn offline(&self, protocol: &str) -> u64 {
        self.offline_total.with_label_values(&[protocol]).get()
    }
}

impl std::fmt::Debug for TransportMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportMetrics").finish_non_exhaustive()
    }
}
