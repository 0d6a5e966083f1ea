#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use scorecard_probe_contracts::ProbeError;
use tokio::sync::watch;

/// Trips every [`CancelToken`] handed out from the same pair.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

/// Cheap to clone. Observes a single cancellation flag that only ever goes
/// from `false` to `true`.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelToken { rx })
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token nobody can trip.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the canceller is gone
    /// without having fired.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Races `fut` against cancellation.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, ProbeError>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(ProbeError::Interrupted);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(ProbeError::Interrupted),
        }
    }

    /// Cooperative sleep that returns early with `Interrupted` on cancel.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ProbeError> {
        self.guard(tokio::time::sleep(duration)).await
    }
}
