use serde::Deserialize;
use std::time::Duration;

/// Top-level harness configuration. Every section falls back to its defaults,
/// so a YAML file only needs to name the values it changes.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub load: LoadConfig,
    pub admission: AdmissionConfig,
    pub retry: RetryConfig,
    pub teardown: TeardownConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_yaml_str(data: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(data)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TargetConfig {
    /// `host:port` of the streaming server.
    pub server: String,
    pub path: String,
}

impl TargetConfig {
    /// Builds the `ws://` URL every client dials.
    pub fn websocket_url(&self) -> String {
        if self.path.starts_with('/') {
            format!("ws://{}{}", self.server, self.path)
        } else {
            format!("ws://{}/{}", self.server, self.path)
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            server: "localhost:8081".to_string(),
            path: "/average-price".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoadConfig {
    pub clients: usize,
    pub duration_secs: u64,
    pub handshake_timeout_ms: u64,
}

impl LoadConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            clients: 10_000,
            duration_secs: 10,
            handshake_timeout_ms: 5_000,
        }
    }
}

/// Pacing of connection attempts during ramp-up.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdmissionConfig {
    /// One admission token is issued per interval.
    pub interval_ms: u64,
    /// How often ramp-up progress is logged. Zero disables progress lines.
    pub progress_interval_ms: u64,
}

impl AdmissionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn progress_interval(&self) -> Option<Duration> {
        (self.progress_interval_ms > 0).then(|| Duration::from_millis(self.progress_interval_ms))
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1,
            progress_interval_ms: 1_000,
        }
    }
}

/// Retry policy applied only when the server signals it is busy.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Retry `n` waits `n * backoff_unit_ms`.
    pub backoff_unit_ms: u64,
}

impl RetryConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit_ms: 1_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TeardownConfig {
    pub close_timeout_ms: u64,
    /// Time readers get to notice their closed connection before being cancelled.
    pub reader_drain_timeout_ms: u64,
}

impl TeardownConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn reader_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_drain_timeout_ms)
    }
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: 2_000,
            reader_drain_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9464,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Filter used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}
