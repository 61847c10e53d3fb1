//! Access control for state-changing operations

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::error::{PacketError, PacketResult};

const TOKEN_FILE_NAME: &str = "access_token.secret";

/// Source of the token callers must present.
pub trait TrustStore: Send + Sync {
    /// `Ok(None)` means no token is configured; callers are then rejected.
    fn expected_token(&self) -> Result<Option<String>>;
}

/// Token kept in a plain file under the storage directory.
#[derive(Debug, Clone)]
pub struct FileTrustStore {
    storage_path: PathBuf,
}

impl FileTrustStore {
    pub fn new(storage_path: PathBuf) -> Self {
        Self { storage_path }
    }

    /// Return the stored token, generating and saving one on first use.
    pub fn ensure_token(&self) -> Result<String> {
        if let Some(token) = self.read_token()? {
            return Ok(token);
        }
        let token = Self::generate_token();
        self.write_token(&token)?;
        Ok(token)
    }

    pub fn read_token(&self) -> Result<Option<String>> {
        let path = self.secret_path();
        if !path.exists() {
            return Ok(None);
        }
        let mut file = fs::File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }

    pub fn secret_path(&self) -> PathBuf {
        self.storage_path.join(TOKEN_FILE_NAME)
    }

    fn write_token(&self, token: &str) -> Result<()> {
        fs::create_dir_all(&self.storage_path)?;
        let path = self.secret_path();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(token.as_bytes())?;
        Ok(())
    }

    fn generate_token() -> String {
        Uuid::new_v4().to_string().replace('-', "")
    }
}

impl From<&Path> for FileTrustStore {
    fn from(path: &Path) -> Self {
        Self::new(path.to_path_buf())
    }
}

impl TrustStore for FileTrustStore {
    fn expected_token(&self) -> Result<Option<String>> {
        self.read_token()
    }
}

/// Fixed token, e.g. from the environment.
#[derive(Debug, Clone, Default)]
pub struct StaticTrustStore {
    token: Option<String>,
}

impl StaticTrustStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Store with no token; every call is rejected.
    pub fn unconfigured() -> Self {
        Self { token: None }
    }
}

impl TrustStore for StaticTrustStore {
    fn expected_token(&self) -> Result<Option<String>> {
        Ok(self
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string))
    }
}

/// Checks presented tokens against a [`TrustStore`]. Stateless apart from
/// the store itself.
#[derive(Clone)]
pub struct AccessGate {
    store: Arc<dyn TrustStore>,
}

impl AccessGate {
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        Self { store }
    }

    pub fn authorize(&self, presented: Option<&str>) -> PacketResult<()> {
        let presented = match presented.map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => return Err(PacketError::Unauthorized("access token required".into())),
        };

        let expected = match self.store.expected_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::warn!("Rejecting call: no access token configured");
                return Err(PacketError::Unauthorized(
                    "access control not configured".into(),
                ));
            }
            Err(e) => {
                tracing::warn!("Rejecting call: trust store unavailable: {e:#}");
                return Err(PacketError::Unauthorized("trust store unavailable".into()));
            }
        };

        if constant_time_eq(&expected, presented) {
            Ok(())
        } else {
            Err(PacketError::Unauthorized("invalid access token".into()))
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
