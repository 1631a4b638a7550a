//! Observability hook.
//!
//! Observers are called synchronously while the throttle holds its lock, so every event
//! carries counters that are exact for the transition it reports and events for one token
//! arrive in lifecycle order. The flip side:
//! - Keep `on_event` short and non-blocking.
//! - Never call back into the throttle from `on_event` (it would deadlock).
//!
//! A panicking observer is caught and logged; throttle state is unaffected.

use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;

use crate::throttle::ThrottleStatus;
use crate::token::{WorkDescriptor, WorkToken};

/// Lifecycle events reported to an [`Observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleEventKind {
    /// Admitted; about to be handed to the dispatcher.
    QueueEnter,
    /// Got a slot; about to be told to proceed.
    QueueLeave,
    /// Refused: no free slot and the wait list is full.
    RequestThrottled,
    /// Completion reported; the slot is about to be released.
    RequestHandled,
    /// Removed from the wait list before it ever ran.
    QueueWithdrawn,
}

impl ThrottleEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleEventKind::QueueEnter => "queue_enter",
            ThrottleEventKind::QueueLeave => "queue_leave",
            ThrottleEventKind::RequestThrottled => "request_throttled",
            ThrottleEventKind::RequestHandled => "request_handled",
            ThrottleEventKind::QueueWithdrawn => "queue_withdrawn",
        }
    }
}

impl std::fmt::Display for ThrottleEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThrottleEvent<'a> {
    pub kind: ThrottleEventKind,
    pub status: ThrottleStatus,
    pub work: &'a WorkDescriptor,
    /// `None` only for [`ThrottleEventKind::RequestThrottled`]: refused work gets no token.
    pub token: Option<WorkToken>,
}

pub trait Observer: Send + Sync {
    fn on_event(&self, event: &ThrottleEvent<'_>);
}

impl<F> Observer for F
where
    F: Fn(&ThrottleEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ThrottleEvent<'_>) {
        self(event)
    }
}

/// Logs every event through `tracing`. Rejections at `warn`, the rest at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &ThrottleEvent<'_>) {
        let running = event.status.running;
        let waiting = event.status.waiting;
        match event.kind {
            ThrottleEventKind::RequestThrottled => {
                tracing::warn!(
                    work = %event.work,
                    running,
                    waiting,
                    "Request throttled"
                );
            }
            kind => {
                tracing::debug!(
                    event = kind.as_str(),
                    work = %event.work,
                    token = ?event.token,
                    running,
                    waiting,
                    "Throttle event"
                );
            }
        }
    }
}

/// Deliver `event` to `observer`, containing any panic.
pub(crate) fn notify(observer: Option<&dyn Observer>, event: ThrottleEvent<'_>) {
    let Some(observer) = observer else {
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))).is_err() {
        tracing::error!(event = event.kind.as_str(), work = %event.work, "Throttle observer panicked");
    }
}
