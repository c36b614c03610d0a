use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub deliveries_in_queue: IntGauge,
    pub active_deliveries: IntGauge,
    pub pings_total: IntCounterVec,
    pub claim_conflicts_total: IntCounter,
    pub earnings_recorded_total: IntCounter,
    pub tracking_subscribers: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_total = IntCounterVec::new(
            Opts::new("dispatch_total", "Dispatch attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of dispatch processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let deliveries_in_queue =
            IntGauge::new("deliveries_in_queue", "Deliveries waiting for dispatch")
                .expect("valid deliveries_in_queue metric");

        let active_deliveries =
            IntGauge::new("active_deliveries", "Deliveries in a non-terminal status")
                .expect("valid active_deliveries metric");

        let pings_total = IntCounterVec::new(
            Opts::new("pings_total", "Location pings by outcome"),
            &["outcome"],
        )
        .expect("valid pings_total metric");

        let claim_conflicts_total = IntCounter::new(
            "claim_conflicts_total",
            "Courier claims lost to a concurrent dispatch",
        )
        .expect("valid claim_conflicts_total metric");

        let earnings_recorded_total = IntCounter::new(
            "earnings_recorded_total",
            "Completed deliveries settled into the earnings ledger",
        )
        .expect("valid earnings_recorded_total metric");

        let tracking_subscribers =
            IntGauge::new("tracking_subscribers", "Connected tracking subscribers")
                .expect("valid tracking_subscribers metric");

        registry
            .register(Box::new(dispatch_total.clone()))
            .expect("register dispatch_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(deliveries_in_queue.clone()))
            .expect("register deliveries_in_queue");
        registry
            .register(Box::new(active_deliveries.clone()))
            .expect("register active_deliveries");
        registry
            .register(Box::new(pings_total.clone()))
            .expect("register pings_total");
        registry
            .register(Box::new(claim_conflicts_total.clone()))
            .expect("register claim_conflicts_total");
        registry
            .register(Box::new(earnings_recorded_total.clone()))
            .expect("register earnings_recorded_total");
        registry
            .register(Box::new(tracking_subscribers.clone()))
            .expect("register tracking_subscribers");

        Self {
            registry,
            dispatch_total,
            dispatch_latency_seconds,
            deliveries_in_queue,
            active_deliveries,
            pings_total,
            claim_conflicts_total,
            earnings_recorded_total,
            tracking_subscribers,
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

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
