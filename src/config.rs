use serde::Deserialize;

use crate::registry::SourcePriority;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ingress: IngressConfig,
    pub aggregation: AggregationConfig,
    pub publishing: PublishingConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// What to do with a new event once the bounded ingress queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room (the default).
    #[default]
    DropOldest,
    /// Reject the incoming event; callers get a retryable failure.
    RejectNew,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    /// Max events buffered between intake and the apply worker.
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Events timestamped further than this into the future are malformed.
    pub clock_skew_tolerance_secs: u64,
    #[serde(default = "default_max_machine_id_len")]
    pub max_machine_id_len: usize,
}

fn default_max_machine_id_len() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Min delay between change-driven recomputes (bounds publish lag).
    pub debounce_ms: u64,
    /// Periodic recompute so staleness alerts surface without new events.
    pub refresh_interval_ms: u64,
    /// A machine with no accepted event for this long counts as an alert.
    pub stale_after_secs: u64,
    /// Tie-break order for same-timestamp events, highest priority first.
    #[serde(default = "default_source_priority")]
    pub source_priority: Vec<String>,
}

fn default_source_priority() -> Vec<String> {
    vec!["sensor".into(), "heartbeat".into(), "manual".into()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max snapshots kept in the broadcast channel for /ws/occupancy (slow clients may lag).
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log app stats (ingress counters, ws clients) at INFO level.
    pub stats_log_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.ingress.queue_capacity > 0,
            "ingress.queue_capacity must be > 0, got {}",
            self.ingress.queue_capacity
        );
        anyhow::ensure!(
            self.ingress.clock_skew_tolerance_secs > 0,
            "ingress.clock_skew_tolerance_secs must be > 0, got {}",
            self.ingress.clock_skew_tolerance_secs
        );
        anyhow::ensure!(
            self.ingress.max_machine_id_len > 0,
            "ingress.max_machine_id_len must be > 0, got {}",
            self.ingress.max_machine_id_len
        );
        anyhow::ensure!(
            self.aggregation.debounce_ms > 0,
            "aggregation.debounce_ms must be > 0, got {}",
            self.aggregation.debounce_ms
        );
        anyhow::ensure!(
            self.aggregation.refresh_interval_ms >= self.aggregation.debounce_ms,
            "aggregation.refresh_interval_ms must be >= debounce_ms, got {}",
            self.aggregation.refresh_interval_ms
        );
        anyhow::ensure!(
            self.aggregation.stale_after_secs > 0,
            "aggregation.stale_after_secs must be > 0, got {}",
            self.aggregation.stale_after_secs
        );
        self.aggregation.source_priority()?;
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}

impl AggregationConfig {
    pub fn source_priority(&self) -> anyhow::Result<SourcePriority> {
        SourcePriority::from_names(&self.source_priority)
    }
}
