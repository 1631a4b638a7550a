//! HTTP transport: axum middleware, status routes and server loop.

mod middleware;
mod routes;
mod server;

pub use middleware::{REQUEST_ID_HEADER, throttle_middleware, throttled};
pub use routes::{StatusResponse, status_routes};
pub use server::{ServerConfig, serve};
