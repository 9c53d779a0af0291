//! HTTP surface for submissions, status reads, and health checks.
//!
//! Thin by design: routes translate between JSON and the pairing facade,
//! never touching queue or supervisor internals directly.

mod routes;
mod server;

pub use routes::{AppState, router};
pub use server::{WebServer, WebServerConfig};
