use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::engine::limiter::AdmissionLimiter;
use crate::engine::reader::read_loop;
use crate::engine::roster::Roster;
use crate::engine::transport::{ConnectionHandle, Transport};
use crate::metrics::Aggregator;

/// Linear backoff for busy servers: retry `n` waits `n * unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, retry: u32) -> Duration {
        self.unit * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            unit: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    WaitingForAdmission,
    Dialing,
    Retrying { retry: u32 },
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Handle stored in the roster and a reader was launched.
    Connected,
    /// The server stayed busy through every retry.
    Abandoned { retries: u32 },
    /// Non-retryable dial error, counted in `connect_errors`.
    Failed,
    /// The limiter had no token left for this worker.
    NotAdmitted,
}

/// Everything a worker shares with its siblings.
pub struct WorkerContext<T: Transport> {
    pub transport: Arc<T>,
    pub url: Arc<str>,
    pub limiter: Arc<AdmissionLimiter>,
    pub roster: Arc<Roster<T::Handle>>,
    pub aggregator: Arc<Aggregator>,
    pub readers: TaskTracker,
    pub drain: CancellationToken,
    pub retry: RetryPolicy,
    pub handshake_timeout: Duration,
}

/// Drives one client from admission to a terminal outcome.
pub async fn run_worker<T: Transport>(id: usize, ctx: Arc<WorkerContext<T>>) -> ConnectOutcome {
    let mut state = WorkerState::WaitingForAdmission;
    let mut retries = 0;

    loop {
        state = match state {
            WorkerState::WaitingForAdmission => match ctx.limiter.acquire().await {
                Some(token) => {
                    debug!(client = id, token = token.seq(), "Admitted");
                    WorkerState::Dialing
                }
                None => {
                    warn!(client = id, "No admission token left, not dialing");
                    return ConnectOutcome::NotAdmitted;
                }
            },
            WorkerState::Dialing => {
                match ctx.transport.dial(&ctx.url, ctx.handshake_timeout).await {
                    Ok((handle, reader)) => {
                        return launch(id, &ctx, handle, reader).await;
                    }
                    Err(e) if e.is_busy() => {
                        if retries < ctx.retry.max_retries {
                            retries += 1;
                            info!(client = id, retry = retries, error = %e, "Server is busy. Retrying...");
                            WorkerState::Retrying { retry: retries }
                        } else {
                            warn!(client = id, retries, "Maximum retries reached. Giving up.");
                            ctx.aggregator.record_abandoned();
                            return ConnectOutcome::Abandoned { retries };
                        }
                    }
                    Err(e) => {
                        ctx.aggregator.record_connect_error(e.kind());
                        warn!(client = id, error = %e, "Connection error");
                        return ConnectOutcome::Failed;
                    }
                }
            }
            WorkerState::Retrying { retry } => {
                tokio::time::sleep(ctx.retry.backoff(retry)).await;
                WorkerState::Dialing
            }
        };
    }
}

async fn launch<T: Transport>(
    id: usize,
    ctx: &WorkerContext<T>,
    handle: T::Handle,
    reader: T::Reader,
) -> ConnectOutcome {
    let counters = match ctx.roster.register(id, handle) {
        Ok(counters) => counters,
        Err((e, handle)) => {
            ctx.aggregator.record_connect_error("roster");
            warn!(client = id, error = %e, "Could not register connection");
            discard(id, handle).await;
            return ConnectOutcome::Failed;
        }
    };
    ctx.aggregator.record_connected();

    ctx.readers.spawn(read_loop(
        id,
        reader,
        counters,
        Arc::clone(&ctx.aggregator),
        ctx.drain.clone(),
    ));
    ConnectOutcome::Connected
}

/// Closes a handle that could not be stored anywhere.
async fn discard<H: ConnectionHandle>(id: usize, mut handle: H) {
    if let Err(e) = handle.close().await {
        debug!(client = id, error = %e, "Error closing unregistered connection");
    }
}
