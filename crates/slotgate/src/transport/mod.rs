//! Transport adapters for slotgate.
//!
//! The throttle core knows nothing about transports; each adapter maps its own
//! request lifecycle onto `acquire`/`SlotGuard`. Currently HTTP via axum.

pub mod http;

pub use http::{ServerConfig, serve, status_routes, throttled};
