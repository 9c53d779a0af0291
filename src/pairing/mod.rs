//! Phone-number pairing orchestration.
//!
//! A submission enters the queue as `Pending`, the dispatcher carries it to a
//! terminal state against the live protocol session, and observers hear about
//! it through the status publisher. Each normalized number has at most one
//! request in flight at a time.

mod dispatcher;
mod queue;
mod service;

pub use dispatcher::{DispatcherConfig, PairingDispatcher};
pub use queue::{
    PairingOutcome, PairingQueue, PairingRequest, RequestState, format_pairing_code,
    normalize_number,
};
pub use service::PairingService;
