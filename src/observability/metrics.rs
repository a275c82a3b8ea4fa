use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub location_samples_total: IntCounterVec,
    pub ingest_latency_seconds: HistogramVec,
    pub active_channels: IntGauge,
    pub active_sessions: IntGauge,
    pub subscribers_evicted_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Order status transition requests by outcome"),
            &["outcome"],
        )
        .expect("valid transitions_total metric");

        let location_samples_total = IntCounterVec::new(
            Opts::new(
                "location_samples_total",
                "Location samples by outcome (accepted/dropped/rejected)",
            ),
            &["outcome"],
        )
        .expect("valid location_samples_total metric");

        let ingest_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ingest_latency_seconds",
                "Latency of location ingest processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid ingest_latency_seconds metric");

        let active_channels =
            IntGauge::new("active_channels", "Tracking channels currently alive")
                .expect("valid active_channels metric");

        let active_sessions = IntGauge::new("active_sessions", "Open tracking sessions")
            .expect("valid active_sessions metric");

        let subscribers_evicted_total = IntCounter::new(
            "subscribers_evicted_total",
            "Subscribers dropped after repeated delivery failures",
        )
        .expect("valid subscribers_evicted_total metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(location_samples_total.clone()))
            .expect("register location_samples_total");
        registry
            .register(Box::new(ingest_latency_seconds.clone()))
            .expect("register ingest_latency_seconds");
        registry
            .register(Box::new(active_channels.clone()))
            .expect("register active_channels");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("register active_sessions");
        registry
            .register(Box::new(subscribers_evicted_total.clone()))
            .expect("register subscribers_evicted_total");

        Self {
            registry,
            transitions_total,
            location_samples_total,
            ingest_latency_seconds,
            active_channels,
            active_sessions,
            subscribers_evicted_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
