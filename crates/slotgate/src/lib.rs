//! slotgate: in-process admission control.
//!
//! A [`Throttle`] runs at most `concurrency` units of work at once and lets at most
//! `queue_tolerance` more wait for a slot in FIFO order; anything beyond that is refused
//! with a [`Rejection`]. Completion is reported out of band with the [`WorkToken`] minted at
//! admission, or by dropping a [`SlotGuard`].

mod config;
mod dispatcher;
mod guard;
mod observer;
mod rejection;
mod throttle;
mod token;

pub mod transport;

pub use config::{ConfigError, ThrottleConfig};
pub use guard::{Acquire, AcquireError, SlotGuard};
pub use observer::{Observer, ThrottleEvent, ThrottleEventKind, TracingObserver};
pub use rejection::{Rejection, RejectionFactory};
pub use throttle::{CompletionError, Throttle, ThrottleBuilder, ThrottleStatus};
pub use token::{WorkDescriptor, WorkToken};
