use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::engine::roster::TeardownSummary;
use crate::metrics::CounterSnapshot;

/// Printed in place of a ratio whose denominator is zero.
pub const NOT_AVAILABLE: &str = "n/a";

/// Final results of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub attempted: usize,
    pub counters: CounterSnapshot,
    /// Sum of per-client read errors, including the ones caused by teardown.
    pub read_errors: u64,
    pub teardown: TeardownSummary,
    pub ramp_up: Duration,
    pub total: Duration,
}

impl Report {
    pub fn connected(&self) -> u64 {
        self.counters.total_connected
    }

    pub fn messages(&self) -> u64 {
        self.counters.total_messages
    }

    pub fn connect_errors(&self) -> u64 {
        self.counters.connect_errors
    }

    /// `None` when no client ever connected.
    pub fn mean_messages_per_client(&self) -> Option<f64> {
        (self.counters.total_connected > 0)
            .then(|| self.counters.total_messages as f64 / self.counters.total_connected as f64)
    }

    /// `None` when no client ever connected or the run took no measurable
    /// time.
    pub fn messages_per_second(&self) -> Option<f64> {
        let secs = self.total.as_secs_f64();
        (self.counters.total_connected > 0 && secs > 0.0)
            .then(|| self.counters.total_messages as f64 / secs)
    }

    /// Emits the summary through the log sink, one line per figure.
    pub fn log(&self) {
        info!("Test completed");
        info!("Total clients attempted: {}", self.attempted);
        info!("Total clients connected: {}", self.connected());
        info!("Total clients abandoned after retries: {}", self.counters.abandoned);
        info!("Total connection errors: {}", self.connect_errors());
        for (kind, count) in &self.counters.error_kinds {
            info!(kind = *kind, count = *count, "Connection errors by kind");
        }
        info!("Total messages received: {}", self.messages());
        info!("Total bytes received: {}", self.counters.total_bytes);
        info!("Total read errors: {}", self.read_errors);
        info!(
            "Connections closed at teardown: {} ({} close errors)",
            self.teardown.closed, self.teardown.close_errors
        );
        info!("Ramp-up duration: {:?}", self.ramp_up);
        info!("Total test duration: {:?}", self.total);
        info!(
            "Average messages per client: {}",
            format_ratio(self.mean_messages_per_client())
        );
        info!(
            "Messages per second: {}",
            format_ratio(self.messages_per_second())
        );
    }
}

pub fn format_ratio(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => NOT_AVAILABLE.to_string(),
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "attempted:        {}", self.attempted)?;
        writeln!(f, "connected:        {}", self.connected())?;
        writeln!(f, "abandoned:        {}", self.counters.abandoned)?;
        writeln!(f, "connect errors:   {}", self.connect_errors())?;
        writeln!(f, "messages:         {}", self.messages())?;
        writeln!(f, "read errors:      {}", self.read_errors)?;
        writeln!(f, "duration:         {:?}", self.total)?;
        writeln!(
            f,
            "msgs/client:      {}",
            format_ratio(self.mean_messages_per_client())
        )?;
        write!(f, "msgs/sec:         {}", format_ratio(self.messages_per_second()))
    }
}
