pub mod error;
pub mod limiter;
pub mod orchestrator;
pub mod reader;
pub mod report;
pub mod roster;
pub mod transport;
pub mod worker;
pub mod ws;
