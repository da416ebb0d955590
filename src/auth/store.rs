//! Durable storage of the access/refresh token pair.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::debug;

/// Errors reading or writing the credential file.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("credential file i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The file exists but is not a credential record.
    #[error("credential file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// The current access and refresh token.
///
/// Either token may be empty. An empty access token with a populated refresh
/// token is the state left behind when the access token has been given up on
/// and a new authorization is pending.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialPair {
    /// Bearer token for API reads.
    pub access_token: String,
    /// Token exchanged for a new pair when the access token is rejected.
    pub refresh_token: String,
}

impl CredentialPair {
    /// Create a new pair.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// True if there is an access token to authorize API calls with.
    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// True if there is a refresh token to exchange.
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// The same pair with the access token dropped.
    pub fn without_access_token(&self) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

fn redact(token: &str) -> &'static str {
    if token.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

/// A JSON file holding a single [`CredentialPair`].
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a reader sees either the old record or the new one.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Create a store backed by the file at `path`. The file does not need
    /// to exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored pair. A missing file loads as the empty pair.
    pub fn load(&self) -> Result<CredentialPair, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no credential file, starting empty");
                return Ok(CredentialPair::default());
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    /// Replace the stored pair.
    pub fn save(&self, pair: &CredentialPair) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, pair)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), "credentials saved");
        Ok(())
    }
}
