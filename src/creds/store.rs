//! File-backed credential store with advisory locking.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::CredentialError;

const STORE_VERSION: u8 = 1;

/// Authentication material for a protocol session.
///
/// `material` is opaque to this service; only the protocol library reads it.
/// `registered` flips to true once the remote service has accepted a pairing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub registered: bool,
    #[serde(default = "empty_object")]
    pub material: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Credentials {
    /// Fresh, unregistered credentials with no material.
    pub fn fresh() -> Self {
        Self {
            registered: false,
            material: empty_object(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    version: u8,
    #[serde(flatten)]
    creds: Credentials,
}

/// Persists credentials as a single locked JSON file.
///
/// Safe to call from connection-event callbacks at arbitrary times: every
/// mutation takes an exclusive advisory lock, rewrites the whole file, and
/// syncs before unlocking.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load credentials from disk.
    ///
    /// A missing or unparseable file yields fresh credentials rather than an
    /// error; the session will simply go through pairing again.
    pub fn load(&self) -> Result<Credentials, CredentialError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Credentials::fresh());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<CredentialFile>(&content) {
            Ok(file) => Ok(file.creds),
            Err(e) => {
                tracing::warn!("Credential file unreadable, starting fresh: {}", e);
                Ok(Credentials::fresh())
            }
        }
    }

    /// Persist the full credential set.
    pub fn save(&self, creds: &Credentials) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let result = write_locked(&mut file, creds);
        fs4::FileExt::unlock(&file)?;
        result
    }

    /// Merge a rotation delta into the stored material.
    ///
    /// The delta must be a JSON object; its top-level keys are inserted or
    /// replaced, other keys are left untouched. A `registered` boolean in the
    /// delta updates the registration flag. Returns the merged credentials.
    pub fn apply_delta(&self, delta: &serde_json::Value) -> Result<Credentials, CredentialError> {
        let serde_json::Value::Object(entries) = delta else {
            return Err(CredentialError::MalformedDelta(value_kind(delta)));
        };

        self.update(|creds| {
            if let Some(registered) = entries.get("registered").and_then(|v| v.as_bool()) {
                creds.registered = registered;
            }
            let serde_json::Value::Object(material) = &mut creds.material else {
                creds.material = serde_json::Value::Object(entries.clone());
                return;
            };
            for (key, value) in entries {
                if key != "registered" {
                    material.insert(key.clone(), value.clone());
                }
            }
        })
    }

    /// Atomic read-modify-write under the file lock.
    pub fn update<F>(&self, f: F) -> Result<Credentials, CredentialError>
    where
        F: FnOnce(&mut Credentials),
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let content = fs::read_to_string(&self.path).unwrap_or_default();
        let mut creds = serde_json::from_str::<CredentialFile>(&content)
            .map(|f| f.creds)
            .unwrap_or_else(|_| Credentials::fresh());

        f(&mut creds);

        let result = write_locked(&mut file, &creds);
        fs4::FileExt::unlock(&file)?;
        result.map(|_| creds)
    }

    /// Remove the credential file. Missing file is not an error.
    pub fn clear(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_locked(file: &mut fs::File, creds: &Credentials) -> Result<(), CredentialError> {
    let wrapper = CredentialFile {
        version: STORE_VERSION,
        creds: creds.clone(),
    };
    let json = serde_json::to_string_pretty(&wrapper)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn value_kind(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
    .to_string()
}
