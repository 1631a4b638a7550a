//! Throttle: admission control around a bounded dispatcher.
//!
//! One mutex owns the running count, the wait list and the pending-completion map, so
//! check-and-enqueue and lookup-and-release are each atomic. Caller callbacks (`proceed`,
//! the rejection factory) always run after the lock is released.
//!
//! Lifecycle of an admitted unit:
//! ```text
//! begin ──► queue_enter ──► [wait list] ──► queue_leave ──► proceed(token)
//!                                │                               │
//!                     withdraw ──┘                    complete(token)
//!                  (queue_withdrawn)                             │
//!                                                  request_handled ──► slot released
//! ```
//!
//! Every admitted unit must be completed exactly once. A unit that never completes keeps
//! its slot forever; the throttle does not time it out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;

use crate::config::{ConfigError, ThrottleConfig};
use crate::dispatcher::{Dispatcher, Submitted};
use crate::observer::{self, Observer, ThrottleEvent, ThrottleEventKind};
use crate::rejection::{self, Rejection, RejectionFactory};
use crate::token::{WorkDescriptor, WorkToken};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// Never admitted, already completed, refused, or still waiting for a slot.
    #[error("completion reported for unknown work token {0}")]
    UnknownToken(WorkToken),
}

/// Point-in-time counters, plus the limits they are bounded by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThrottleStatus {
    pub running: usize,
    pub waiting: usize,
    pub concurrency: usize,
    pub queue_tolerance: usize,
}

impl ThrottleStatus {
    /// Every slot taken and the wait list full: the next arrival is refused.
    pub fn is_saturated(&self) -> bool {
        self.running >= self.concurrency && self.waiting >= self.queue_tolerance
    }
}

type Proceed = Box<dyn FnOnce(WorkToken) + Send>;

struct QueuedWork {
    token: WorkToken,
    work: WorkDescriptor,
    proceed: Proceed,
}

struct PendingEntry {
    work: WorkDescriptor,
    started_at: Instant,
}

/// A unit that just got a slot. Its proceed callback runs once the lock is dropped.
struct Started {
    token: WorkToken,
    proceed: Proceed,
}

impl Started {
    fn run(self) {
        (self.proceed)(self.token);
    }
}

struct State {
    dispatcher: Dispatcher<QueuedWork>,
    pending: HashMap<WorkToken, PendingEntry>,
}

pub struct ThrottleBuilder {
    config: ThrottleConfig,
    rejection: Option<RejectionFactory>,
    observer: Option<Arc<dyn Observer>>,
}

impl ThrottleBuilder {
    /// Shape the error handed back for refused work.
    pub fn rejection<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ThrottleStatus, &WorkDescriptor) -> Rejection + Send + Sync + 'static,
    {
        self.rejection = Some(Arc::new(factory));
        self
    }

    pub fn observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> Result<Throttle, ConfigError> {
        self.config.validate()?;
        Ok(Throttle {
            concurrency: self.config.concurrency,
            queue_tolerance: self.config.queue_tolerance,
            state: Mutex::new(State {
                dispatcher: Dispatcher::new(self.config.concurrency),
                pending: HashMap::new(),
            }),
            rejection: self.rejection.unwrap_or_else(rejection::default_factory),
            observer: self.observer,
        })
    }
}

/// Bounds concurrently running work and the number of units waiting for a slot.
pub struct Throttle {
    concurrency: usize,
    queue_tolerance: usize,
    state: Mutex<State>,
    rejection: RejectionFactory,
    observer: Option<Arc<dyn Observer>>,
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("concurrency", &self.concurrency)
            .field("queue_tolerance", &self.queue_tolerance)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Throttle {
    /// Throttle with the default rejection and no observer.
    pub fn new(concurrency: usize, queue_tolerance: usize) -> Result<Self, ConfigError> {
        Self::builder(ThrottleConfig::new(concurrency, queue_tolerance)).build()
    }

    pub fn builder(config: ThrottleConfig) -> ThrottleBuilder {
        ThrottleBuilder {
            config,
            rejection: None,
            observer: None,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn queue_tolerance(&self) -> usize {
        self.queue_tolerance
    }

    /// Admit or refuse one unit of work.
    ///
    /// On admission `proceed` is called with the unit's token once it holds a slot: before
    /// `begin` returns if a slot is free, otherwise from whichever `complete` frees one.
    /// The returned token must be passed to [`Throttle::complete`] exactly once after the
    /// work is done, whatever its outcome.
    ///
    /// On refusal `proceed` is dropped uncalled and the token is never minted; do not call
    /// `complete`.
    pub fn begin<F>(&self, work: WorkDescriptor, proceed: F) -> Result<WorkToken, Rejection>
    where
        F: FnOnce(WorkToken) + Send + 'static,
    {
        let mut state = self.lock();

        if !state.dispatcher.has_free_slot() && state.dispatcher.len() >= self.queue_tolerance {
            let status = self.snapshot(&state);
            self.emit(ThrottleEventKind::RequestThrottled, status, &work, None);
            drop(state);
            return Err((self.rejection)(&status, &work));
        }

        let token = WorkToken::mint();
        self.emit(
            ThrottleEventKind::QueueEnter,
            self.snapshot(&state),
            &work,
            Some(token),
        );

        let queued = QueuedWork {
            token,
            work,
            proceed: Box::new(proceed),
        };
        let started = match state.dispatcher.submit(queued) {
            Submitted::Started(queued) => Some(self.start(&mut state, queued)),
            Submitted::Queued => {
                tracing::debug!(%token, waiting = state.dispatcher.len(), "Work queued");
                None
            }
        };
        drop(state);

        if let Some(started) = started {
            started.run();
        }
        Ok(token)
    }

    /// Report that the unit holding `token` is finished and free its slot.
    ///
    /// If a unit is waiting, it is started (its `proceed` runs on this call stack).
    ///
    /// An unknown token is a caller bug (double completion, or a token that never held a
    /// slot). It is logged and returned as an error; no slot is freed and throttle state is
    /// unchanged.
    pub fn complete(&self, token: WorkToken) -> Result<(), CompletionError> {
        let mut state = self.lock();

        let Some(entry) = state.pending.remove(&token) else {
            drop(state);
            tracing::error!(%token, "Completion reported for unknown work token");
            return Err(CompletionError::UnknownToken(token));
        };

        // Observers see the counts from just before the slot is freed.
        self.emit(
            ThrottleEventKind::RequestHandled,
            self.snapshot(&state),
            &entry.work,
            Some(token),
        );

        let next = state.dispatcher.release();
        let next = next.map(|queued| self.start(&mut state, queued));
        drop(state);

        tracing::debug!(
            %token,
            work = %entry.work,
            elapsed = ?entry.started_at.elapsed(),
            "Work completed"
        );

        if let Some(next) = next {
            next.run();
        }
        Ok(())
    }

    /// Remove a unit that is still waiting for a slot.
    ///
    /// Returns `false` if the token is not on the wait list (already started, completed,
    /// or unknown); a started unit must be completed instead.
    pub fn withdraw(&self, token: WorkToken) -> bool {
        let mut state = self.lock();
        let Some(queued) = state.dispatcher.withdraw(|q| q.token == token) else {
            return false;
        };
        self.emit(
            ThrottleEventKind::QueueWithdrawn,
            self.snapshot(&state),
            &queued.work,
            Some(token),
        );
        drop(state);

        tracing::debug!(%token, work = %queued.work, "Waiting work withdrawn");
        true
    }

    pub fn status(&self) -> ThrottleStatus {
        let state = self.lock();
        self.snapshot(&state)
    }

    /// Record that `queued` holds a slot. Called with the lock held.
    fn start(&self, state: &mut State, queued: QueuedWork) -> Started {
        let QueuedWork {
            token,
            work,
            proceed,
        } = queued;

        self.emit(
            ThrottleEventKind::QueueLeave,
            self.snapshot(state),
            &work,
            Some(token),
        );
        state.pending.insert(
            token,
            PendingEntry {
                work,
                started_at: Instant::now(),
            },
        );

        Started { token, proceed }
    }

    fn snapshot(&self, state: &State) -> ThrottleStatus {
        ThrottleStatus {
            running: state.dispatcher.running(),
            waiting: state.dispatcher.len(),
            concurrency: self.concurrency,
            queue_tolerance: self.queue_tolerance,
        }
    }

    fn emit(
        &self,
        kind: ThrottleEventKind,
        status: ThrottleStatus,
        work: &WorkDescriptor,
        token: Option<WorkToken>,
    ) {
        observer::notify(
            self.observer.as_deref(),
            ThrottleEvent {
                kind,
                status,
                work,
                token,
            },
        );
    }

    /// Lock the shared state, recovering from poison.
    ///
    /// Nothing that can panic runs between related updates (observers are caught), so a
    /// poisoned lock still guards consistent counters.
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Throttle state mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }
}
