//! Session credential storage
//!
//! `SessionStore` is the durable backend shared by every request. Two backends
//! ship with the gateway:
//!
//! - `MemoryStore` keeps credentials in-process (lost on restart)
//! - `FileStore` mirrors a JSON file, written atomically (temp file + rename)
//!   with 0600 permissions, keyed by the hashed session id
//!
//! `CredentialStore` binds a backend to one session id and is the handle the
//! gateway threads through every authenticated call.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::credentials::{Credential, SessionId, now_millis};
use crate::error::{Error, Result};

/// Boxed future returned by `SessionStore` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Backend holding at most one credential per session.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn SessionStore>`).
pub trait SessionStore: Send + Sync {
    /// Backend name for logging and health reporting.
    fn kind(&self) -> &'static str;

    /// Credential for a session. Fully expired credentials read as `None`.
    fn load<'a>(&'a self, session: &'a SessionId) -> StoreFuture<'a, Option<Credential>>;

    /// Replace the session's credential.
    fn save<'a>(&'a self, session: &'a SessionId, credential: Credential) -> StoreFuture<'a, ()>;

    /// Remove the session's credential. Removing an absent session is not an error.
    fn remove<'a>(&'a self, session: &'a SessionId) -> StoreFuture<'a, ()>;

    /// Drop every credential whose tokens have all expired. Returns the count removed.
    fn purge_expired(&self, now: u64) -> StoreFuture<'_, usize>;
}

/// In-process session store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<HashMap<String, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl SessionStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn load<'a>(&'a self, session: &'a SessionId) -> StoreFuture<'a, Option<Credential>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Ok(take_live(&mut state, &session.storage_key(), now_millis()))
        })
    }

    fn save<'a>(&'a self, session: &'a SessionId, credential: Credential) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.state
                .lock()
                .await
                .insert(session.storage_key(), credential);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, session: &'a SessionId) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.state.lock().await.remove(&session.storage_key());
            Ok(())
        })
    }

    fn purge_expired(&self, now: u64) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let before = state.len();
            state.retain(|_, cred| !cred.is_expired(now));
            Ok(before - state.len())
        })
    }
}

/// File-backed session store.
///
/// The tokio Mutex serializes all writes. Reads acquire the lock briefly to
/// clone from the in-memory mirror and never touch the disk.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Credential>>,
}

impl FileStore {
    /// Load sessions from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` (cold start, no sessions).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading session file: {e}")))?;
            let sessions: HashMap<String, Credential> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), sessions = sessions.len(), "loaded sessions");
            sessions
        } else {
            info!(path = %path.display(), "session file not found, starting with empty store");
            let sessions = HashMap::new();
            write_atomic(&path, &sessions).await?;
            sessions
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }
}

impl SessionStore for FileStore {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn load<'a>(&'a self, session: &'a SessionId) -> StoreFuture<'a, Option<Credential>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let now = now_millis();
            // Expired entries are left for the sweeper so reads never write.
            Ok(state
                .get(&session.storage_key())
                .filter(|cred| !cred.is_expired(now))
                .cloned())
        })
    }

    fn save<'a>(&'a self, session: &'a SessionId, credential: Credential) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let key = session.storage_key();
            let previous = state.insert(key.clone(), credential);
            if let Err(e) = write_atomic(&self.path, &state).await {
                // Keep the mirror in step with the file
                match previous {
                    Some(previous) => state.insert(key, previous),
                    None => state.remove(&key),
                };
                return Err(e);
            }
            debug!("saved session credential");
            Ok(())
        })
    }

    fn remove<'a>(&'a self, session: &'a SessionId) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let key = session.storage_key();
            if let Some(previous) = state.remove(&key) {
                if let Err(e) = write_atomic(&self.path, &state).await {
                    state.insert(key, previous);
                    return Err(e);
                }
                debug!("removed session credential");
            }
            Ok(())
        })
    }

    fn purge_expired(&self, now: u64) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let before = state.len();
            state.retain(|_, cred| !cred.is_expired(now));
            let purged = before - state.len();
            if purged > 0 {
                write_atomic(&self.path, &state).await?;
            }
            Ok(purged)
        })
    }
}

/// Remove and drop a fully expired entry; return a clone of a live one.
fn take_live(
    state: &mut HashMap<String, Credential>,
    key: &str,
    now: u64,
) -> Option<Credential> {
    match state.get(key) {
        Some(cred) if cred.is_expired(now) => {
            state.remove(key);
            None
        }
        other => other.cloned(),
    }
}

/// Write sessions to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since the
/// file contains upstream tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, Credential>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing sessions: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".sessions.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted sessions");
    Ok(())
}

/// One session's view of the backend: `read`, `write`, `clear`.
///
/// Cheap to clone; every request handler builds one from the session cookie.
#[derive(Clone)]
pub struct CredentialStore {
    session: SessionId,
    backend: Arc<dyn SessionStore>,
}

impl CredentialStore {
    pub fn new(session: SessionId, backend: Arc<dyn SessionStore>) -> Self {
        Self { session, backend }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Current credential, if the session holds one.
    pub async fn read(&self) -> Result<Option<Credential>> {
        self.backend.load(&self.session).await
    }

    /// Atomically replace the session's credential.
    pub async fn write(&self, credential: Credential) -> Result<()> {
        self.backend.save(&self.session, credential).await
    }

    /// Remove both tokens. Idempotent.
    pub async fn clear(&self) -> Result<()> {
        self.backend.remove(&self.session).await
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("session", &self.session)
            .field("backend", &self.backend.kind())
            .finish()
    }
}
