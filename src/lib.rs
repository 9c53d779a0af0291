//! Pairing-code session service.
//!
//! Keeps one authenticated connection to a remote messaging service alive and
//! turns submitted phone numbers into device pairing codes:
//!
//! ```text
//! HTTP submit ──> PairingQueue ──> PairingDispatcher ──> ProtocolSession
//!                      │                  │                     │
//!                      │            StatusPublisher <── ConnectionSupervisor
//!                      └──────── status reads                   │
//!                                                      CredentialStore
//! ```
//!
//! The supervisor owns the only live session, reconnecting on transient
//! closes and purging credentials when the remote service logs the device
//! out. The dispatcher serializes pairing-code requests against that session,
//! one number at a time.

pub mod app;
pub mod config;
pub mod creds;
pub mod error;
pub mod pairing;
pub mod session;
pub mod status;
pub mod supervisor;
pub mod web;

pub use app::App;
pub use config::Config;
pub use error::Error;
