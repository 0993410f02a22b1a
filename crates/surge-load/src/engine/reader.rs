use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::engine::error::ReadError;
use crate::engine::roster::ClientCounters;
use crate::engine::transport::MessageReader;
use crate::metrics::Aggregator;

/// Consumes messages until the connection fails or is closed. Every exit
/// path counts exactly one read error against the client.
pub async fn read_loop<R: MessageReader>(
    id: usize,
    mut reader: R,
    counters: Arc<ClientCounters>,
    aggregator: Arc<Aggregator>,
    drain: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            res = reader.receive() => res,
            _ = drain.cancelled() => Err(ReadError::Cancelled),
        };

        match received {
            Ok(payload) => {
                if !counters.record_message(payload.len()) {
                    counters.record_read_error();
                    trace!(client = id, "Message arrived after teardown, not counted");
                    return;
                }
                aggregator.record_message(payload.len());
            }
            Err(e) => {
                counters.record_read_error();
                debug!(
                    client = id,
                    error = %e,
                    messages = counters.messages_received(),
                    "Reader stopped"
                );
                return;
            }
        }
    }
}
