use prometheus::{
    opts, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Registry,
    TextEncoder,
};

pub struct ObservabilityRepository {
    registry: Registry,
    active_instance_count: Gauge,
    heartbeat_total: IntCounter,
    idle_decision_total: CounterVec,
    notification_failure_total: CounterVec,
    api_request_total: CounterVec,
    api_request_latency_seconds: HistogramVec,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let active_instance_count = Gauge::with_opts(opts!(
            "snoozer_active_instance_count",
            "Registered instances"
        ))
        .map_err(|e| e.to_string())?;
        let heartbeat_total = IntCounter::with_opts(opts!(
            "snoozer_heartbeat_total",
            "Heartbeats received from agents"
        ))
        .map_err(|e| e.to_string())?;
        let idle_decision_total = CounterVec::new(
            opts!(
                "snoozer_idle_decision_total",
                "Idle notifications by decided action"
            ),
            &["action"],
        )
        .map_err(|e| e.to_string())?;
        let notification_failure_total = CounterVec::new(
            opts!(
                "snoozer_notification_failure_total",
                "Failed notification deliveries by provider"
            ),
            &["provider"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_total = CounterVec::new(
            opts!(
                "snoozer_api_request_total",
                "Operator API request total"
            ),
            &["endpoint", "status"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "snoozer_api_request_latency_seconds",
                "Operator API request latency (seconds)",
            ),
            &["endpoint"],
        )
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(active_instance_count.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(heartbeat_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(idle_decision_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(notification_failure_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            active_instance_count,
            heartbeat_total,
            idle_decision_total,
            notification_failure_total,
            api_request_total,
            api_request_latency_seconds,
        })
    }

    pub fn set_active_instance_count(&self, count: f64) {
        self.active_instance_count.set(count);
    }

    pub fn inc_heartbeat_total(&self) {
        self.heartbeat_total.inc();
    }

    pub fn inc_idle_decision(&self, action: &str) {
        self.idle_decision_total.with_label_values(&[action]).inc();
    }

    pub fn inc_notification_failure(&self, provider: &str) {
        self.notification_failure_total
            .with_label_values(&[provider])
            .inc();
    }

    pub fn observe_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.api_request_total
            .with_label_values(&[endpoint, status])
            .inc();
        self.api_request_latency_seconds
            .with_label_values(&[endpoint])
            .observe(seconds);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
