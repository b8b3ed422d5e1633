//! Encrypted on-disk settings: install id and the current token set.

use crate::token::TokenSet;
use arc_swap::ArcSwap;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

/// The persisted state of one installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
    install_id: Uuid,
    tokens: Option<TokenSet>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            install_id: Uuid::new_v4(),
            tokens: None,
        }
    }
}

/// Errors from reading or writing the settings blob.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("settings i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// The decrypted blob did not parse.
    #[error("settings serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    /// Encryption or decryption failed.
    #[error("settings encryption failed")]
    Crypto,
    /// The supplied key has the wrong length.
    #[error("settings key must be {expected} bytes, got {actual}")]
    KeyLength {
        /// Required key length in bytes.
        expected: usize,
        /// Length of the key that was supplied.
        actual: usize,
    },
}

/// Encrypted settings store shared by every component of the crate.
///
/// Reads are lock-free against an in-memory copy; every mutation takes the
/// single write lock, persists to a temp file, then atomically renames over
/// the real file. A leftover temp file from an interrupted write is used for
/// read repair at open time.
pub struct SettingsStore {
    path: PathBuf,
    cipher: XChaCha20Poly1305,
    current: ArcSwap<Settings>,
    write_lock: tokio::sync::Mutex<()>,
}

impl SettingsStore {
    /// Opens (or initializes) the store at `path` with the given 32-byte key.
    ///
    /// A missing file yields fresh defaults. A corrupt or undecryptable file
    /// is replaced by fresh defaults with a logged warning; the previous
    /// session is lost but the process keeps running.
    pub fn open(path: impl Into<PathBuf>, key: &[u8]) -> Result<Self, StoreError> {
        if key.len() != KEY_LEN {
            return Err(StoreError::KeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            });
        }
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| StoreError::KeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            })?;

        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (settings, loaded) = load_settings(&path, &cipher);
        if !loaded {
            // Persist immediately so the generated install id survives a
            // restart that never saves tokens.
            persist_sync(&path, &cipher, &settings)?;
        }
        Ok(Self {
            path,
            cipher,
            current: ArcSwap::from_pointee(settings),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Stable id of this installation, generated on first open.
    pub fn install_id(&self) -> Uuid {
        self.current.load().install_id
    }

    /// Currently stored token set, if any.
    pub fn tokens(&self) -> Option<TokenSet> {
        self.current.load().tokens.clone()
    }

    /// Replaces the stored token set and persists.
    pub async fn save_tokens(&self, tokens: TokenSet) -> Result<(), StoreError> {
        self.update(|settings| settings.tokens = Some(tokens)).await
    }

    /// Removes any stored token set and persists.
    pub async fn clear_tokens(&self) -> Result<(), StoreError> {
        self.update(|settings| settings.tokens = None).await
    }

    /// Applies a mutation under the write lock and persists atomically.
    async fn update(&self, mutate: impl FnOnce(&mut Settings)) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut settings = (**self.current.load()).clone();
        mutate(&mut settings);
        self.persist(&settings).await?;
        self.current.store(Arc::new(settings));
        Ok(())
    }

    async fn persist(&self, settings: &Settings) -> Result<(), StoreError> {
        let blob = seal(&self.cipher, settings)?;
        let tmp = temp_path(&self.path);
        tokio::fs::write(&tmp, &blob).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("path", &self.path)
            .field("install_id", &self.install_id())
            .field("has_tokens", &self.current.load().tokens.is_some())
            .finish()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn seal(cipher: &XChaCha20Poly1305, settings: &Settings) -> Result<Vec<u8>, StoreError> {
    let plain = serde_json::to_vec(settings)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plain.as_slice())
        .map_err(|_| StoreError::Crypto)?;
    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

fn unseal(cipher: &XChaCha20Poly1305, blob: &[u8]) -> Result<Settings, StoreError> {
    if blob.len() < NONCE_LEN {
        return Err(StoreError::Crypto);
    }
    let (nonce, sealed) = blob.split_at(NONCE_LEN);
    let plain = cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| StoreError::Crypto)?;
    Ok(serde_json::from_slice(&plain)?)
}

fn persist_sync(
    path: &Path,
    cipher: &XChaCha20Poly1305,
    settings: &Settings,
) -> Result<(), StoreError> {
    let blob = seal(cipher, settings)?;
    let tmp = temp_path(path);
    std::fs::write(&tmp, &blob)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads settings from disk, repairing from a leftover temp file when the
/// main file is unreadable. Falls back to defaults rather than failing; the
/// second element is `false` when defaults were used.
fn load_settings(path: &Path, cipher: &XChaCha20Poly1305) -> (Settings, bool) {
    match read_blob(path, cipher) {
        Ok(Some(settings)) => return (settings, true),
        Ok(None) => {}
        Err(err) => warn!(path = %path.display(), error = %err, "settings file unreadable"),
    }

    let tmp = temp_path(path);
    match read_blob(&tmp, cipher) {
        Ok(Some(settings)) => {
            debug!(path = %path.display(), "recovered settings from interrupted write");
            if let Err(err) = std::fs::rename(&tmp, path) {
                warn!(error = %err, "failed to promote recovered settings file");
            }
            return (settings, true);
        }
        Ok(None) => {}
        Err(err) => warn!(path = %tmp.display(), error = %err, "settings temp file unreadable"),
    }

    debug!(path = %path.display(), "starting with fresh settings");
    (Settings::default(), false)
}

fn read_blob(path: &Path, cipher: &XChaCha20Poly1305) -> Result<Option<Settings>, StoreError> {
    let blob = match std::fs::read(path) {
        Ok(blob) => blob,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    unseal(cipher, &blob).map(Some)
}
