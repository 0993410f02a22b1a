use dashmap::DashMap;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run-wide counters shared by every worker and reader.
#[derive(Debug, Default)]
pub struct Aggregator {
    connect_errors: AtomicU64,
    total_messages: AtomicU64,
    total_bytes: AtomicU64,
    total_connected: AtomicU64,
    abandoned: AtomicU64,
    error_kinds: DashMap<&'static str, u64>,
}

/// Point-in-time copy of the [`Aggregator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub connect_errors: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub total_connected: u64,
    pub abandoned: u64,
    /// Connect errors by kind, sorted by label.
    pub error_kinds: Vec<(&'static str, u64)>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connected(&self) {
        self.total_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message(&self, len: usize) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Non-retryable dial failure.
    pub fn record_connect_error(&self, kind: &'static str) {
        self.connect_errors.fetch_add(1, Ordering::Relaxed);
        *self.error_kinds.entry(kind).or_insert(0) += 1;
    }

    /// Busy retries exhausted. Not a connect error.
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_connected(&self) -> u64 {
        self.total_connected.load(Ordering::Relaxed)
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn connect_errors(&self) -> u64 {
        self.connect_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let mut error_kinds: Vec<(&'static str, u64)> = self
            .error_kinds
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        error_kinds.sort_unstable();

        CounterSnapshot {
            connect_errors: self.connect_errors(),
            total_messages: self.total_messages(),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            total_connected: self.total_connected(),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            error_kinds,
        }
    }
}

/// Renders live [`Aggregator`] values in the Prometheus text format.
pub struct MetricsExporter {
    registry: Registry,
    connected: IntGauge,
    messages: IntGauge,
    bytes: IntGauge,
    connect_errors: IntGauge,
    abandoned: IntGauge,
    aggregator: Arc<Aggregator>,
}

impl MetricsExporter {
    pub fn new(aggregator: Arc<Aggregator>) -> prometheus::Result<Self> {
        let registry = Registry::new();
        let connected = IntGauge::new(
            "surge_connected_clients",
            "Number of clients that completed the handshake",
        )?;
        let messages = IntGauge::new(
            "surge_messages_received",
            "Total data messages received across all clients",
        )?;
        let bytes = IntGauge::new(
            "surge_bytes_received",
            "Total payload bytes received across all clients",
        )?;
        let connect_errors = IntGauge::new(
            "surge_connect_errors",
            "Clients that failed to connect with a non-retryable error",
        )?;
        let abandoned = IntGauge::new(
            "surge_abandoned_clients",
            "Clients that gave up after the server stayed busy",
        )?;

        for gauge in [&connected, &messages, &bytes, &connect_errors, &abandoned] {
            registry.register(Box::new(gauge.clone()))?;
        }

        Ok(Self {
            registry,
            connected,
            messages,
            bytes,
            connect_errors,
            abandoned,
            aggregator,
        })
    }

    fn update_metrics(&self) {
        let snapshot = self.aggregator.snapshot();
        self.connected.set(snapshot.total_connected as i64);
        self.messages.set(snapshot.total_messages as i64);
        self.bytes.set(snapshot.total_bytes as i64);
        self.connect_errors.set(snapshot.connect_errors as i64);
        self.abandoned.set(snapshot.abandoned as i64);
    }

    pub fn render(&self) -> String {
        self.update_metrics();

        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}", e);
        }

        String::from_utf8(buffer).unwrap_or_else(|_| "# Error: Invalid UTF8".to_string())
    }
}

async fn metrics_handler(
    req: Request<Body>,
    exporter: Arc<MetricsExporter>,
) -> Result<Response<Body>, Infallible> {
    match req.uri().path() {
        "/health" => Ok(Response::new(Body::from("OK"))),
        "/metrics" => Ok(Response::new(Body::from(exporter.render()))),
        _ => {
            let mut not_found = Response::new(Body::from("Not Found"));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

/// Binds the observability endpoint and serves it until `shutdown` fires.
/// Returns the bound address, which differs from `addr` when port 0 is used.
pub fn spawn_metrics_server(
    addr: SocketAddr,
    exporter: Arc<MetricsExporter>,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let exporter = Arc::clone(&exporter);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                metrics_handler(req, Arc::clone(&exporter))
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    let local_addr = server.local_addr();
    let graceful = server.with_graceful_shutdown(async move { shutdown.cancelled().await });

    info!(addr = %local_addr, "Observability server online");

    let handle = tokio::spawn(async move {
        if let Err(e) = graceful.await {
            error!(error = %e, "Observability server failed");
        }
    });

    Ok((local_addr, handle))
}
