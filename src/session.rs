//! Encrypted-at-rest browser session state.
//!
//! The plaintext storage-state file only exists while the process runs.
//! `SessionGuard::unlock` decrypts the sidecar into place at startup and
//! `seal` re-encrypts and deletes the plaintext on every exit path, with a
//! `Drop` backstop so a panic cannot leave credentials on disk.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

/// Suffix appended to the plaintext path to form the encrypted sidecar path.
pub const SIDECAR_SUFFIX: &str = ".enc";

/// Cookie domain used when bootstrapping from an initial cookie string.
pub const COOKIE_DOMAIN: &str = ".x.com";

const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;
const TEN_YEARS_SECS: f64 = 60.0 * 60.0 * 24.0 * 365.0 * 10.0;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("failed to decrypt session sidecar {path}: wrong key or corrupted data")]
    Decrypt { path: PathBuf },
    #[error("failed to encrypt session state")]
    Encrypt,
    #[error("session state I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed bootstrap cookie entry: {0:?}")]
    MalformedCookie(String),
}

/// Symmetric cipher for the session sidecar.
///
/// XChaCha20-Poly1305 over the whole file; the sidecar is
/// `nonce || ciphertext+tag`, so tampering or a rotated key fails
/// authentication instead of yielding garbage.
pub struct StateCipher {
    cipher: XChaCha20Poly1305,
}

impl StateCipher {
    /// Build a cipher from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not valid base64 or not 32 bytes.
    pub fn from_base64(key_b64: &str) -> Result<Self, SessionError> {
        let key = BASE64
            .decode(key_b64.trim())
            .map_err(|e| SessionError::InvalidKey(format!("not valid base64: {e}")))?;
        if key.len() != KEY_LEN {
            return Err(SessionError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| SessionError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// # Errors
    ///
    /// Returns an error if the cipher rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| SessionError::Encrypt)?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// # Errors
    ///
    /// Fails on truncated input, a wrong key, or a tampered blob. The `path`
    /// is only used for the error message.
    pub fn decrypt(&self, blob: &[u8], path: &Path) -> Result<Vec<u8>, SessionError> {
        if blob.len() < NONCE_LEN {
            return Err(SessionError::Decrypt {
                path: path.to_path_buf(),
            });
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| SessionError::Decrypt {
                path: path.to_path_buf(),
            })
    }
}

#[must_use]
pub fn sidecar_path(state_path: &Path) -> PathBuf {
    let mut s = state_path.as_os_str().to_os_string();
    s.push(SIDECAR_SUFFIX);
    PathBuf::from(s)
}

/// Scoped acquisition of the plaintext session-state file.
///
/// While a guard is live the plaintext file may exist on disk; sealing (or
/// dropping) the guard encrypts it into the sidecar and removes it.
pub struct SessionGuard {
    state_path: PathBuf,
    sidecar_path: PathBuf,
    cipher: StateCipher,
    sealed: bool,
}

impl SessionGuard {
    /// Decrypt the sidecar into the plaintext path if a sidecar exists.
    ///
    /// After this returns, the plaintext file either holds freshly decrypted
    /// state or is absent (first run).
    ///
    /// # Errors
    ///
    /// Decryption failure is fatal: a wrong or rotated key must abort startup
    /// rather than silently proceed unauthenticated.
    pub fn unlock(state_path: &Path, cipher: StateCipher) -> Result<Self, SessionError> {
        let sidecar = sidecar_path(state_path);
        if sidecar.exists() {
            let blob = std::fs::read(&sidecar).map_err(|e| SessionError::Io {
                path: sidecar.clone(),
                source: e,
            })?;
            let plaintext = cipher.decrypt(&blob, &sidecar)?;
            std::fs::write(state_path, plaintext).map_err(|e| SessionError::Io {
                path: state_path.to_path_buf(),
                source: e,
            })?;
            info!(path = %state_path.display(), "Session state decrypted");
        } else {
            info!("No session sidecar found, starting without stored state");
        }
        Ok(Self {
            state_path: state_path.to_path_buf(),
            sidecar_path: sidecar,
            cipher,
            sealed: false,
        })
    }

    /// Encrypt the plaintext state (if present) into the sidecar and delete
    /// the plaintext.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or any file operation fails; the
    /// plaintext file is only removed after the sidecar write succeeded.
    pub fn seal(mut self) -> Result<(), SessionError> {
        self.sealed = true;
        seal_state(&self.state_path, &self.sidecar_path, &self.cipher)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.sealed {
            return;
        }
        // Backstop for panics and early returns that skipped seal().
        if let Err(e) = seal_state(&self.state_path, &self.sidecar_path, &self.cipher) {
            error!("Failed to seal session state during teardown: {e}");
        }
    }
}

fn seal_state(
    state_path: &Path,
    sidecar_path: &Path,
    cipher: &StateCipher,
) -> Result<(), SessionError> {
    if !state_path.exists() {
        return Ok(());
    }
    let plaintext = std::fs::read(state_path).map_err(|e| SessionError::Io {
        path: state_path.to_path_buf(),
        source: e,
    })?;
    let blob = cipher.encrypt(&plaintext)?;
    std::fs::write(sidecar_path, blob).map_err(|e| SessionError::Io {
        path: sidecar_path.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(state_path).map_err(|e| SessionError::Io {
        path: state_path.to_path_buf(),
        source: e,
    })?;
    info!(path = %sidecar_path.display(), "Session state sealed");
    Ok(())
}

/// Browser session state persisted between runs (the plaintext file schema).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
}

/// One cookie of the stored session. Field names follow the DevTools
/// protocol so the struct converts to and from CDP cookie types via serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

/// Synthesize session state from a semicolon-delimited `key=value` cookie
/// string, each cookie scoped to the platform domain with a far-future
/// expiry.
///
/// # Errors
///
/// Returns an error on an entry without a `=` separator.
pub fn bootstrap_state(cookie_header: &str) -> Result<StorageState, SessionError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64());

    let mut cookies = Vec::new();
    for entry in cookie_header.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| SessionError::MalformedCookie(entry.to_string()))?;
        cookies.push(StoredCookie {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            domain: COOKIE_DOMAIN.to_string(),
            path: "/".to_string(),
            expires: now + TEN_YEARS_SECS,
            http_only: false,
            secure: true,
        });
    }
    Ok(StorageState { cookies })
}

/// Load the plaintext state file, falling back to the bootstrap cookie
/// string, falling back to an empty state.
///
/// # Errors
///
/// Returns an error if an existing state file cannot be read or parsed, or
/// if the bootstrap cookie string is malformed.
pub async fn load_or_bootstrap(
    state_path: &Path,
    initial_cookies: Option<&str>,
) -> anyhow::Result<StorageState> {
    use anyhow::Context;

    match tokio::fs::read_to_string(state_path).await {
        Ok(raw) => {
            let state: StorageState = serde_json::from_str(&raw).with_context(|| {
                format!("Failed to parse session state {}", state_path.display())
            })?;
            info!(cookies = state.cookies.len(), "Loaded stored session state");
            Ok(state)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => match initial_cookies {
            Some(header) => {
                let state = bootstrap_state(header)?;
                info!(
                    cookies = state.cookies.len(),
                    "Bootstrapped session state from initial cookies"
                );
                Ok(state)
            }
            None => {
                warn!("No stored session state and no initial cookies configured");
                Ok(StorageState::default())
            }
        },
        Err(e) => Err(e).with_context(|| {
            format!("Failed to read session state {}", state_path.display())
        }),
    }
}
