//! Backpressure error returned when a throttle turns work away.

use std::sync::Arc;

use crate::throttle::ThrottleStatus;
use crate::token::WorkDescriptor;

/// A unit of work was refused because every slot and every wait-list place was taken.
///
/// This is the normal backpressure signal, not a failure of the throttle. The status code
/// lets a transport map the rejection onto its own failure class (HTTP 503 by default).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Rejection {
    message: String,
    status: u16,
}

impl Rejection {
    pub const DEFAULT_MESSAGE: &'static str = "request throttled";
    pub const DEFAULT_STATUS: u16 = 503;

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Self::DEFAULT_STATUS,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> u16 {
        self.status
    }
}

impl Default for Rejection {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MESSAGE)
    }
}

/// Builds the [`Rejection`] handed back for a refused unit of work.
///
/// Called outside the throttle's lock with the counters observed at the refusal.
pub type RejectionFactory =
    Arc<dyn Fn(&ThrottleStatus, &WorkDescriptor) -> Rejection + Send + Sync>;

pub(crate) fn default_factory() -> RejectionFactory {
    Arc::new(|_, _| Rejection::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rejection_is_generic_503() {
        let rejection = Rejection::default();
        assert_eq!(rejection.status(), 503);
        assert_eq!(rejection.to_string(), "request throttled");
    }

    #[test]
    fn default_factory_ignores_caller_context() {
        let status = ThrottleStatus {
            running: 2,
            waiting: 2,
            concurrency: 2,
            queue_tolerance: 2,
        };
        let work = WorkDescriptor::new("POST /work").with_request_id("secret-id");
        let rejection = default_factory()(&status, &work);
        assert_eq!(rejection, Rejection::default());
        assert!(!rejection.message().contains("secret-id"));
    }

    #[test]
    fn custom_status_is_kept() {
        let rejection = Rejection::new("slow down").with_status(429);
        assert_eq!(rejection.status(), 429);
        assert_eq!(rejection.message(), "slow down");
    }
}
