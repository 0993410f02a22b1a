use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Permit to make one dial attempt sequence.
#[derive(Debug)]
pub struct AdmissionToken {
    seq: usize,
}

impl AdmissionToken {
    pub fn seq(&self) -> usize {
        self.seq
    }
}

/// Paces connection attempts: a background issuer puts `budget` tokens into a
/// bounded pool, one per `period`, then closes the pool.
pub struct AdmissionLimiter {
    tokens: Mutex<mpsc::Receiver<AdmissionToken>>,
    issued: Arc<AtomicUsize>,
    budget: usize,
    issuer: JoinHandle<()>,
}

impl AdmissionLimiter {
    /// Starts the issuer. The first token is available immediately, so the
    /// last of `budget` tokens lands after `(budget - 1) * period`.
    pub fn start(budget: usize, period: Duration) -> Self {
        let (tx, rx) = mpsc::channel(budget.max(1));
        let issued = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&issued);

        let issuer = tokio::spawn(async move {
            let mut ticker = (!period.is_zero()).then(|| {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });

            for seq in 0..budget {
                if let Some(ticker) = ticker.as_mut() {
                    ticker.tick().await;
                }
                counter.fetch_add(1, Ordering::SeqCst);
                if tx.send(AdmissionToken { seq }).await.is_err() {
                    debug!(issued = seq, "Admission pool dropped before budget was spent");
                    return;
                }
            }
            info!(tokens = budget, "Admission budget fully issued");
        });

        Self {
            tokens: Mutex::new(rx),
            issued,
            budget,
            issuer,
        }
    }

    /// Waits for the next token. Returns `None` once the whole budget has been
    /// handed out, rather than blocking forever.
    pub async fn acquire(&self) -> Option<AdmissionToken> {
        self.tokens.lock().await.recv().await
    }

    /// Tokens put into the pool so far.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }
}

impl Drop for AdmissionLimiter {
    fn drop(&mut self) {
        self.issuer.abort();
    }
}
