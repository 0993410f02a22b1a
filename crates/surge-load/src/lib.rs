pub mod engine;
pub mod metrics;

pub use engine::orchestrator::{LoadTest, LoadTestSettings};
pub use engine::report::Report;
pub use engine::ws::WsTransport;
pub use metrics::{Aggregator, MetricsExporter};
