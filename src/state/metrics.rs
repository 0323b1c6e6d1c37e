use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,

    // Discovery metrics
    pub plugins_discovered: IntGauge,

    // Worker metrics
    pub workers_running: IntGauge,
    pub spawns_total: IntCounter,
    pub spawn_failures_total: IntCounter,
    pub unproductive_runs_total: IntCounter,

    // Protocol metrics
    pub protocol_violations_total: IntCounter,
    pub samples_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let plugins_discovered = IntGauge::new(
            "pluginsd_plugins_discovered",
            "Number of plugin executables known to the supervisor",
        )
        .expect("metric creation failed");

        let workers_running = IntGauge::new(
            "pluginsd_workers_running",
            "Number of plugin workers currently alive",
        )
        .expect("metric creation failed");
        let spawns_total =
            IntCounter::new("pluginsd_spawns_total", "Total number of plugin processes started")
                .expect("metric creation failed");
        let spawn_failures_total = IntCounter::new(
            "pluginsd_spawn_failures_total",
            "Total number of plugin processes that could not be started",
        )
        .expect("metric creation failed");
        let unproductive_runs_total = IntCounter::new(
            "pluginsd_unproductive_runs_total",
            "Total number of plugin runs that produced no samples",
        )
        .expect("metric creation failed");

        let protocol_violations_total = IntCounter::new(
            "pluginsd_protocol_violations_total",
            "Total number of plugins disabled for sending invalid lines",
        )
        .expect("metric creation failed");
        let samples_total =
            IntCounter::new("pluginsd_samples_total", "Total number of accepted SET lines")
                .expect("metric creation failed");

        // Register all metrics
        registry
            .register(Box::new(plugins_discovered.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(workers_running.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(spawns_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(spawn_failures_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(unproductive_runs_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(protocol_violations_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(samples_total.clone()))
            .expect("metric registration failed");

        Self {
            registry,
            plugins_discovered,
            workers_running,
            spawns_total,
            spawn_failures_total,
            unproductive_runs_total,
            protocol_violations_total,
            samples_total,
        }
    }

    pub fn set_plugins_discovered(&self, count: usize) {
        self.plugins_discovered.set(count as i64);
    }

    pub fn worker_started(&self) {
        self.workers_running.inc();
    }

    pub fn worker_stopped(&self) {
        self.workers_running.dec();
    }

    pub fn record_spawn(&self) {
        self.spawns_total.inc();
    }

    pub fn record_spawn_failure(&self) {
        self.spawn_failures_total.inc();
    }

    pub fn record_unproductive_run(&self) {
        self.unproductive_runs_total.inc();
    }

    pub fn record_protocol_violation(&self) {
        self.protocol_violations_total.inc();
    }

    pub fn record_samples(&self, samples: u64) {
        self.samples_total.inc_by(samples);
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition of every metric.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.gather_metrics(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
