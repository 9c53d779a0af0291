//! Pairing request table with state-machine transitions.
//!
//! One entry per normalized phone number, keyed by the digits-only form.
//! Transitions: `Pending -> Processing -> {CodeGenerated | Error | Invalid}`,
//! plus `Processing -> Pending` when a request must be redispatched after a
//! supervised reconnect. Terminal entries are retained for status queries
//! until `clear()` or a fresh submission for the same number.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SubmitError;

/// Minimum digits in a valid phone number.
const MIN_NUMBER_LEN: usize = 8;
/// Maximum digits in a valid phone number.
const MAX_NUMBER_LEN: usize = 15;
/// Pairing codes are displayed in groups of this many characters.
const CODE_GROUP_LEN: usize = 4;
const CODE_GROUP_SEPARATOR: char = '-';

/// Lifecycle state of a pairing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Processing,
    CodeGenerated,
    Invalid,
    Error,
}

impl RequestState {
    /// In-flight states block duplicate submissions.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RequestState::Pending | RequestState::Processing)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Pending => write!(f, "pending"),
            RequestState::Processing => write!(f, "processing"),
            RequestState::CodeGenerated => write!(f, "code_generated"),
            RequestState::Invalid => write!(f, "invalid"),
            RequestState::Error => write!(f, "error"),
        }
    }
}

/// A single pairing request and its current state.
#[derive(Debug, Clone, Serialize)]
pub struct PairingRequest {
    /// Unique id for this submission, mostly for log correlation.
    pub id: Uuid,
    /// User-submitted input, unvalidated.
    pub raw_number: String,
    /// Digits-only canonical key.
    pub normalized_number: String,
    pub state: RequestState,
    /// Formatted pairing code, once generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PairingRequest {
    fn new(raw: &str, normalized: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            raw_number: raw.to_string(),
            normalized_number: normalized,
            state: RequestState::Pending,
            code: None,
            error_detail: None,
            submitted_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of dispatching a `Processing` entry.
#[derive(Debug, Clone)]
pub enum PairingOutcome {
    /// Remote service issued a code (already formatted).
    CodeGenerated(String),
    /// The request failed; detail is user-visible.
    Error(String),
    /// The number was rejected as unpairable by the remote service.
    Invalid,
    /// The connection fell over mid-flight; put the entry back in line.
    Requeued,
}

/// Reduce a raw submission to its digits-only canonical form.
///
/// Strips every non-digit character, then enforces the 8-15 digit length
/// window: `"+1 (234) 567-8901"` normalizes to `"12345678901"`.
pub fn normalize_number(raw: &str) -> Result<String, SubmitError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < MIN_NUMBER_LEN || digits.len() > MAX_NUMBER_LEN {
        return Err(SubmitError::InvalidLength { len: digits.len() });
    }
    Ok(digits)
}

/// Group a raw pairing code for display: `"12345678"` becomes `"1234-5678"`.
///
/// A trailing short group is kept as-is; there is never a trailing separator.
pub fn format_pairing_code(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    chars
        .chunks(CODE_GROUP_LEN)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(&CODE_GROUP_SEPARATOR.to_string())
}

/// Lock-guarded request table.
///
/// Every mutation takes the single write lock, which is what makes
/// `next_pending`'s claim-on-read atomic and keeps concurrent submissions
/// from racing each other.
pub struct PairingQueue {
    entries: RwLock<HashMap<String, PairingRequest>>,
}

impl PairingQueue {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Accept a submission, normalizing and de-duplicating it.
    ///
    /// Returns the normalized key on success. A terminal entry for the same
    /// number is replaced by the fresh submission (re-arming); an in-flight
    /// entry rejects the duplicate.
    pub async fn submit(&self, raw: &str) -> Result<String, SubmitError> {
        let normalized = normalize_number(raw)?;

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&normalized)
            && existing.state.is_in_flight()
        {
            return Err(SubmitError::AlreadyInFlight);
        }
        entries.insert(
            normalized.clone(),
            PairingRequest::new(raw, normalized.clone()),
        );
        Ok(normalized)
    }

    /// Claim one `Pending` entry, atomically moving it to `Processing`.
    ///
    /// The transition happens under the same write lock as the lookup, so two
    /// concurrent callers can never claim the same entry. Entries are claimed
    /// oldest-first.
    pub async fn next_pending(&self) -> Option<PairingRequest> {
        let mut entries = self.entries.write().await;
        let key = entries
            .values()
            .filter(|r| r.state == RequestState::Pending)
            .min_by_key(|r| r.submitted_at)
            .map(|r| r.normalized_number.clone())?;

        let entry = entries.get_mut(&key)?;
        entry.state = RequestState::Processing;
        entry.updated_at = Utc::now();
        Some(entry.clone())
    }

    /// Record the outcome of a dispatched entry.
    ///
    /// Only `Processing` entries transition; anything else is left untouched
    /// and `false` is returned. Terminal states never transition except via
    /// `clear()` or a fresh `submit`.
    pub async fn mark_result(&self, key: &str, outcome: PairingOutcome) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if entry.state != RequestState::Processing {
            return false;
        }

        match outcome {
            PairingOutcome::CodeGenerated(code) => {
                entry.state = RequestState::CodeGenerated;
                entry.code = Some(code);
                entry.error_detail = None;
            }
            PairingOutcome::Error(detail) => {
                entry.state = RequestState::Error;
                entry.error_detail = Some(detail);
            }
            PairingOutcome::Invalid => {
                entry.state = RequestState::Invalid;
                entry.error_detail = Some("Number cannot be paired".to_string());
            }
            PairingOutcome::Requeued => {
                entry.state = RequestState::Pending;
            }
        }
        entry.updated_at = Utc::now();
        true
    }

    /// Look up a request by its normalized key.
    pub async fn get(&self, key: &str) -> Option<PairingRequest> {
        self.entries.read().await.get(key).cloned()
    }

    /// Drop every entry, terminal or not.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Total entries, any state.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when no entries exist.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of entries currently `Pending`.
    pub async fn pending_count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|r| r.state == RequestState::Pending)
            .count()
    }
}

impl Default for PairingQueue {
    fn default() -> Self {
        Self::new()
    }
}
