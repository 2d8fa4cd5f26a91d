//! Cancellation signal for suspension points
//!
//! Suspension points are exactly the calls to the completion service and the
//! store. A `CancelToken` is cheap to clone and checked (or raced) at those
//! points; the owning side cancels through the `CancelHandle`.

use tokio::sync::watch;

/// Sender side of a cancellation signal
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Receivers may all be gone; that is fine
        let _ = self.tx.send(true);
    }
}

/// Receiver side of a cancellation signal
#[derive(Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Create a connected handle/token pair
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx: Some(rx) })
    }

    /// A token that is never cancelled
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolve once cancellation is requested; pends forever on a
    /// never-cancelled token or a dropped handle
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            std::future::pending::<()>().await;
            return;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}
