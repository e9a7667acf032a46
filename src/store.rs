//! Durable session record
//!
//! Small client-local pointer to the last-known shard and username,
//! read at session start, written on successful login and successful
//! resolution, cleared on logout.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// The durable record persisted between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub username: String,
    #[serde(rename = "chatServer")]
    pub chat_server: String,
    #[serde(rename = "authServer")]
    pub auth_server: String,
}

/// File-backed store for the session record
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn store_error(&self, source: impl std::error::Error + Send + Sync + 'static) -> SessionError {
        SessionError::Store {
            path: self.path.display().to_string(),
            source: Box::new(source),
        }
    }

    /// Read the record if one exists. A missing file is not an error.
    pub fn load(&self) -> Result<Option<SessionRecord>, SessionError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.store_error(e)),
        };

        let record = serde_json::from_str(&content).map_err(|e| self.store_error(e))?;
        Ok(Some(record))
    }

    /// Persist the record, replacing any previous one.
    pub fn save(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let content = serde_json::to_string_pretty(record).map_err(|e| self.store_error(e))?;
        fs::write(&self.path, content).map_err(|e| self.store_error(e))
    }

    /// Remove the record (logout). Removing an absent file succeeds.
    pub fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.store_error(e)),
        }
    }
}
