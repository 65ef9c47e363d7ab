//! Step State and Outputs
//!
//! The runner gives every step two append-only files, `$GITHUB_STATE` and
//! `$GITHUB_OUTPUT`. Entries written to the state file by the `main` step come back
//! as `STATE_<KEY>` environment variables in the `post` step; that is the only way
//! `get-token` can tell `revoke-token` which token to revoke.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;
use uuid::Uuid;

use crate::error::ChannelError;
use crate::workflow::Env;

pub const STATE_FILE_VAR: &str = "GITHUB_STATE";
pub const OUTPUT_FILE_VAR: &str = "GITHUB_OUTPUT";
/// Prefix the runner puts in front of saved state when replaying it
pub const STATE_ENV_PREFIX: &str = "STATE_";

/// Durable append-only line storage keyed by path
pub trait LineStore: Send + Sync {
    /// Append `text` to `path` and make it durable before returning
    fn append(&self, path: &Path, text: &str) -> io::Result<()>;
}

/// Appends to real files, creating them when missing
pub struct FileLineStore;

impl LineStore for FileLineStore {
    fn append(&self, path: &Path, text: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()
    }
}

/// Keeps appended text in memory, per path
#[derive(Default)]
pub struct MemoryLineStore {
    files: Mutex<HashMap<PathBuf, String>>,
}

impl MemoryLineStore {
    /// Everything appended to `path` so far
    pub fn contents(&self, path: impl AsRef<Path>) -> String {
        self.files
            .lock()
            .ok()
            .and_then(|files| files.get(path.as_ref()).cloned())
            .unwrap_or_default()
    }
}

impl LineStore for MemoryLineStore {
    fn append(&self, path: &Path, text: &str) -> io::Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| io::Error::other("line store poisoned"))?;
        files.entry(path.to_path_buf()).or_default().push_str(text);
        Ok(())
    }
}

/// State key as the runner exposes it: uppercased, `-` replaced by `_`
pub fn normalize_key(name: &str) -> String {
    name.replace('-', "_").to_uppercase()
}

/// State and output files of the current step
pub struct StateChannel<'a> {
    env: &'a Env,
    store: &'a dyn LineStore,
}

impl<'a> StateChannel<'a> {
    pub fn new(env: &'a Env, store: &'a dyn LineStore) -> Self {
        Self { env, store }
    }

    /// Save `value` for the `post` step of this action
    pub fn persist(&self, name: &str, value: &str) -> Result<(), ChannelError> {
        let path = self
            .env
            .get(STATE_FILE_VAR)
            .ok_or(ChannelError::Unavailable(STATE_FILE_VAR))?;

        if name.is_empty() {
            return Err(ChannelError::InvalidKey);
        }
        let key = normalize_key(name);

        if value.is_empty() {
            return Err(ChannelError::InvalidValue {
                key,
                reason: "value is empty",
            });
        }
        if value.contains(['\n', '\r']) {
            return Err(ChannelError::InvalidValue {
                key,
                reason: "state does not support line breaks in the value",
            });
        }

        debug!(key = %key, "Saving state");
        self.append(path, &format!("{}={}\n", key, value))
    }

    /// Read a value saved by the `main` step
    pub fn retrieve(&self, name: &str) -> Result<String, ChannelError> {
        let key = format!("{}{}", STATE_ENV_PREFIX, normalize_key(name));
        self.env
            .get(&key)
            .map(str::to_string)
            .ok_or(ChannelError::NotFound(key))
    }

    /// Publish `value` as step output `name` (key used verbatim)
    pub fn set_output(&self, name: &str, value: &str) -> Result<(), ChannelError> {
        let path = self
            .env
            .get(OUTPUT_FILE_VAR)
            .ok_or(ChannelError::Unavailable(OUTPUT_FILE_VAR))?;

        if name.is_empty() {
            return Err(ChannelError::InvalidKey);
        }

        let entry = if value.contains(['\n', '\r']) {
            let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
            if name.contains(&delimiter) || value.contains(&delimiter) {
                return Err(ChannelError::InvalidValue {
                    key: name.to_string(),
                    reason: "value contains the output delimiter",
                });
            }
            format!("{}<<{}\n{}\n{}\n", name, delimiter, value, delimiter)
        } else {
            format!("{}={}\n", name, value)
        };

        debug!(key = %name, "Setting output");
        self.append(path, &entry)
    }

    fn append(&self, path: &str, entry: &str) -> Result<(), ChannelError> {
        let path = Path::new(path);
        self.store
            .append(path, entry)
            .map_err(|source| ChannelError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}
