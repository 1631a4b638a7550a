//! Async admission with an owned completion guard.
//!
//! [`Throttle::acquire`] turns the callback contract of [`Throttle::begin`] into a future:
//! - `Err(Rejection)` immediately when the throttle is saturated.
//! - Otherwise an [`Acquire`] future that resolves once the unit holds a slot, yielding a
//!   [`SlotGuard`]. Dropping the guard is the completion signal.
//!
//! Cancellation is safe at every point. Dropping an unresolved `Acquire` withdraws the unit
//! from the wait list, or completes it if it was started but never observed. The slot can
//! only leak if a `SlotGuard` is leaked (`mem::forget`) or consumed via `into_token` and
//! never completed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::rejection::Rejection;
use crate::throttle::Throttle;
use crate::token::{WorkDescriptor, WorkToken};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("queued work was discarded before it could start")]
    Closed,
}

impl Throttle {
    /// Admit `work`, returning a future that resolves once it holds a slot.
    pub fn acquire(self: &Arc<Self>, work: WorkDescriptor) -> Result<Acquire, Rejection> {
        let (tx, rx) = oneshot::channel();
        let throttle = Arc::downgrade(self);

        let token = self.begin(work, move |token| {
            if tx.send(()).is_err()
                && let Some(throttle) = throttle.upgrade()
            {
                // The waiter went away between promotion and this callback.
                tracing::debug!(%token, "Slot granted to abandoned waiter - releasing");
                let _ = throttle.complete(token);
            }
        })?;

        Ok(Acquire {
            throttle: Arc::clone(self),
            token,
            rx: Some(rx),
        })
    }
}

/// Future returned by [`Throttle::acquire`].
#[must_use = "futures do nothing unless polled; dropping it withdraws the work"]
pub struct Acquire {
    throttle: Arc<Throttle>,
    token: WorkToken,
    rx: Option<oneshot::Receiver<()>>,
}

impl Acquire {
    pub fn token(&self) -> WorkToken {
        self.token
    }
}

impl Future for Acquire {
    type Output = Result<SlotGuard, AcquireError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let rx = this.rx.as_mut().expect("Acquire polled after completion");

        let result = match Pin::new(rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };
        this.rx = None;

        Poll::Ready(match result {
            Ok(()) => Ok(SlotGuard::new(Arc::clone(&this.throttle), this.token)),
            Err(_) => Err(AcquireError::Closed),
        })
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        if self.throttle.withdraw(self.token) {
            return;
        }

        // Already promoted. Closing first means the proceed callback either delivered
        // before this point (seen by try_recv) or will fail to send and complete itself.
        rx.close();
        if rx.try_recv().is_ok() {
            tracing::debug!(token = %self.token, "Acquire dropped after slot was granted - releasing");
            let _ = self.throttle.complete(self.token);
        }
    }
}

/// Holds one throttle slot. Dropping it reports completion.
#[must_use = "dropping the guard immediately releases the slot"]
pub struct SlotGuard {
    throttle: Arc<Throttle>,
    token: WorkToken,
    armed: bool,
}

impl SlotGuard {
    fn new(throttle: Arc<Throttle>, token: WorkToken) -> Self {
        Self {
            throttle,
            token,
            armed: true,
        }
    }

    pub fn token(&self) -> WorkToken {
        self.token
    }

    /// Take over completion: the caller must pass the token to [`Throttle::complete`].
    pub fn into_token(mut self) -> WorkToken {
        self.armed = false;
        self.token
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("token", &self.token)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            // Errors are logged by `complete`.
            let _ = self.throttle.complete(self.token);
        }
    }
}
