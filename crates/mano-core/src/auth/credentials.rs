use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Keychain service name for the keyring backend
const SERVICE_NAME: &str = "mano-dashboard";

/// Keychain entry holding the bearer token
const TOKEN_KEY: &str = "token";

/// Keychain entry holding the authenticated subject (the login email)
const SUBJECT_KEY: &str = "subject";

/// Credential file name in the data directory
const CREDENTIAL_FILE: &str = "credentials.json";

/// The bearer token plus the identity it was issued to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub subject: String,
}

impl Credential {
    pub fn new(token: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            subject: subject.into(),
        }
    }
}

// Tokens never reach the logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("subject", &self.subject)
            .finish()
    }
}

/// Durable persistence for the single system-wide credential.
///
/// `load` never fails: an unavailable or corrupt store reads as "no
/// credential" so callers can always fall back to an anonymous session.
pub trait CredentialStore: Send + Sync {
    /// Persist the credential, replacing whatever was stored before.
    fn save(&self, credential: &Credential) -> Result<()>;

    /// Return the last saved credential, if any.
    fn load(&self) -> Option<Credential>;

    /// Remove the stored credential. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// File backend
// ============================================================================

/// Stores the credential as a JSON record in the application data directory.
///
/// The whole record is written to a sibling temp file and renamed into place,
/// so a concurrent `load` sees either the old record or the new one.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CREDENTIAL_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.tmp", CREDENTIAL_FILE))
    }

    fn read(path: &Path) -> Result<Credential> {
        let contents =
            std::fs::read_to_string(path).context("Failed to read credential file")?;
        serde_json::from_str(&contents).context("Failed to parse credential file")
    }
}

/// Write `contents` to `path`, readable by the owner only on unix.
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // A leftover temp file keeps its old mode through `open`
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, credential: &Credential) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("Failed to create data directory")?;

        let contents = serde_json::to_string_pretty(credential)?;
        let temp = self.temp_path();
        write_private(&temp, &contents).context("Failed to write credential file")?;
        std::fs::rename(&temp, self.path()).context("Failed to move credential file into place")?;

        debug!(subject = %credential.subject, "Credential saved");
        Ok(())
    }

    fn load(&self) -> Option<Credential> {
        let path = self.path();
        if !path.exists() {
            return None;
        }

        match Self::read(&path) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Ignoring unreadable credential file");
                None
            }
        }
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove credential file")?;
        }
        Ok(())
    }
}

// ============================================================================
// Keyring backend
// ============================================================================

/// Named secrets the keyring backend reads and writes.
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when the entry does not exist.
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Deleting a missing entry is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// The OS keychain (macOS Keychain, Windows Credential Manager, Secret Service).
pub struct OsKeychain {
    service: String,
}

impl OsKeychain {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl SecretStore for OsKeychain {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to write to keychain")
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

/// Stores token and subject as two secrets.
///
/// A save drops the old token before writing the subject and writes the new
/// token last, undoing the subject if that fails. Reads require both
/// entries, so any interrupted save reads as no credential rather than a
/// token paired with the wrong subject.
pub struct KeyringCredentialStore {
    secrets: Box<dyn SecretStore>,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self::with_secrets(OsKeychain::new(service))
    }

    pub fn with_secrets(secrets: impl SecretStore + 'static) -> Self {
        Self {
            secrets: Box::new(secrets),
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.secrets.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, key, "Keychain unavailable");
                None
            }
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, credential: &Credential) -> Result<()> {
        self.secrets
            .delete(TOKEN_KEY)
            .context("Failed to remove previous token from keychain")?;
        self.secrets
            .set(SUBJECT_KEY, &credential.subject)
            .context("Failed to store subject in keychain")?;

        if let Err(e) = self.secrets.set(TOKEN_KEY, &credential.token) {
            if let Err(undo) = self.secrets.delete(SUBJECT_KEY) {
                warn!(error = %undo, "Failed to remove orphaned subject from keychain");
            }
            return Err(e).context("Failed to store token in keychain");
        }

        debug!(subject = %credential.subject, "Credential saved to keychain");
        Ok(())
    }

    fn load(&self) -> Option<Credential> {
        let token = self.read(TOKEN_KEY)?;
        let subject = self.read(SUBJECT_KEY)?;
        Some(Credential { token, subject })
    }

    fn clear(&self) -> Result<()> {
        // Token first, so an interrupted clear leaves nothing usable behind
        self.secrets.delete(TOKEN_KEY)?;
        self.secrets.delete(SUBJECT_KEY)
    }
}

// ============================================================================
// Revocation guard
// ============================================================================

/// Wraps a backend so a failed `clear` still withdraws the credential.
///
/// After a failed clear the credential is revoked for the rest of the
/// process: `load` reports nothing and retries the clear, until a later
/// clear succeeds or a new credential is saved.
pub struct RevocableCredentialStore {
    inner: Box<dyn CredentialStore>,
    revoked: AtomicBool,
}

impl RevocableCredentialStore {
    pub fn new(inner: Box<dyn CredentialStore>) -> Self {
        Self {
            inner,
            revoked: AtomicBool::new(false),
        }
    }

    /// True while a credential that could not be cleared is being withheld.
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }
}

impl CredentialStore for RevocableCredentialStore {
    fn save(&self, credential: &Credential) -> Result<()> {
        self.inner.save(credential)?;
        self.revoked.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> Option<Credential> {
        if self.is_revoked() {
            match self.inner.clear() {
                Ok(()) => {
                    debug!("Revoked credential cleared on retry");
                    self.revoked.store(false, Ordering::SeqCst);
                }
                Err(e) => debug!(error = %e, "Revoked credential still stored"),
            }
            return None;
        }
        self.inner.load()
    }

    fn clear(&self) -> Result<()> {
        match self.inner.clear() {
            Ok(()) => {
                self.revoked.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.revoked.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local store. Used by tests and as the fallback when no data
/// directory can be determined.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, credential: &Credential) -> Result<()> {
        let mut slot = self
            .credential
            .write()
            .map_err(|_| anyhow::anyhow!("Credential lock poisoned"))?;
        *slot = Some(credential.clone());
        Ok(())
    }

    fn load(&self) -> Option<Credential> {
        self.credential.read().ok().and_then(|slot| slot.clone())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = self
            .credential
            .write()
            .map_err(|_| anyhow::anyhow!("Credential lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}
