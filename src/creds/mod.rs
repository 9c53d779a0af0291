//! Credential persistence for the protocol session.
//!
//! The session's long-lived authentication material is an opaque blob owned
//! by the remote protocol library. We persist it as a versioned JSON file and
//! apply rotation deltas append-only, so a half-finished handshake never
//! clobbers unrelated key material.

mod store;

pub use store::{CredentialStore, Credentials};
