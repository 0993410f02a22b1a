use std::sync::Arc;
use std::time::Duration;
use surge_common::Config;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::engine::limiter::AdmissionLimiter;
use crate::engine::report::Report;
use crate::engine::roster::Roster;
use crate::engine::transport::Transport;
use crate::engine::worker::{run_worker, RetryPolicy, WorkerContext};
use crate::metrics::Aggregator;

/// Resolved parameters for one run.
#[derive(Debug, Clone)]
pub struct LoadTestSettings {
    pub url: String,
    pub clients: usize,
    /// Length of the observation window after ramp-up.
    pub duration: Duration,
    pub admission_interval: Duration,
    pub progress_interval: Option<Duration>,
    pub handshake_timeout: Duration,
    pub retry: RetryPolicy,
    pub close_timeout: Duration,
    pub reader_drain_timeout: Duration,
}

impl LoadTestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.target.websocket_url(),
            clients: config.load.clients,
            duration: config.load.duration(),
            admission_interval: config.admission.interval(),
            progress_interval: config.admission.progress_interval(),
            handshake_timeout: config.load.handshake_timeout(),
            retry: RetryPolicy {
                max_retries: config.retry.max_retries,
                unit: config.retry.backoff_unit(),
            },
            close_timeout: config.teardown.close_timeout(),
            reader_drain_timeout: config.teardown.reader_drain_timeout(),
        }
    }
}

impl Default for LoadTestSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Owns one run: ramp-up, observation window, teardown, report.
pub struct LoadTest<T: Transport> {
    transport: Arc<T>,
    settings: LoadTestSettings,
    aggregator: Arc<Aggregator>,
}

impl<T: Transport> LoadTest<T> {
    pub fn new(transport: T, settings: LoadTestSettings) -> Self {
        Self {
            transport: Arc::new(transport),
            settings,
            aggregator: Arc::new(Aggregator::new()),
        }
    }

    /// Uses `aggregator` instead of a fresh one, e.g. one already exported
    /// over `/metrics`.
    pub fn with_aggregator(mut self, aggregator: Arc<Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    pub fn settings(&self) -> &LoadTestSettings {
        &self.settings
    }

    pub async fn run(self) -> Report {
        self.run_detailed().await.0
    }

    /// Like [`LoadTest::run`], also returning the roster so per-client
    /// counters can be inspected afterwards.
    pub async fn run_detailed(self) -> (Report, Arc<Roster<T::Handle>>) {
        let settings = &self.settings;
        let clients = settings.clients;
        let roster = Arc::new(Roster::new(clients));
        let workers = TaskTracker::new();
        let readers = TaskTracker::new();
        let drain = CancellationToken::new();

        info!(url = %settings.url, clients, "Connecting to {}", settings.url);
        let start = Instant::now();

        let ctx = Arc::new(WorkerContext {
            transport: Arc::clone(&self.transport),
            url: Arc::from(settings.url.as_str()),
            limiter: Arc::new(AdmissionLimiter::start(clients, settings.admission_interval)),
            roster: Arc::clone(&roster),
            aggregator: Arc::clone(&self.aggregator),
            readers: readers.clone(),
            drain: drain.clone(),
            retry: settings.retry,
            handshake_timeout: settings.handshake_timeout,
        });

        for id in 0..clients {
            workers.spawn(run_worker(id, Arc::clone(&ctx)));
        }
        workers.close();

        let ramping = CancellationToken::new();
        let progress = settings
            .progress_interval
            .filter(|every| !every.is_zero())
            .map(|every| {
                spawn_progress(every, clients, Arc::clone(&self.aggregator), ramping.clone())
            });

        info!("Waiting for all clients to connect...");
        workers.wait().await;
        ramping.cancel();
        if let Some(progress) = progress {
            let _ = progress.await;
        }
        drop(ctx);

        let ramp_up = start.elapsed();
        info!(
            connected = self.aggregator.total_connected(),
            attempted = clients,
            "All clients connected in {:?}",
            ramp_up
        );

        info!("Running test for {:?}...", settings.duration);
        sleep(settings.duration).await;
        let total = start.elapsed();

        info!("Closing all connections...");
        let teardown = roster.teardown(settings.close_timeout).await;

        readers.close();
        if timeout(settings.reader_drain_timeout, readers.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = readers.len(),
                "Readers still running after drain timeout, cancelling"
            );
            drain.cancel();
            readers.wait().await;
        }

        let report = Report {
            attempted: clients,
            counters: self.aggregator.snapshot(),
            read_errors: roster.total_read_errors(),
            teardown,
            ramp_up,
            total,
        };
        (report, roster)
    }
}

/// Logs connect progress until `ramping` is cancelled.
fn spawn_progress(
    every: Duration,
    attempted: usize,
    aggregator: Arc<Aggregator>,
    ramping: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ramping.cancelled() => return,
                _ = ticker.tick() => {
                    info!(
                        connected = aggregator.total_connected(),
                        connect_errors = aggregator.connect_errors(),
                        attempted,
                        "Ramp-up in progress"
                    );
                }
            }
        }
    })
}
