//! Persistent key-value storage and the session record kept in it.
//!
//! [`KeyValueStore`] is the storage seam, the analogue of a web page's local
//! storage. [`SessionStore`] layers the session semantics on top:
//! `jwt` and `user_id` are read, written and cleared as a pair.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Error;
use crate::types::{Jwt, Session, UserId};

pub const JWT_KEY: &str = "jwt";
pub const USER_ID_KEY: &str = "user_id";
pub const CODE_VERIFIER_KEY: &str = "twitter_code_verifier";

/// Consumer-provided string key-value persistence.
///
/// Implementations must make each single-key operation durable before
/// returning `Ok`.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, Error>;

    fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), Error>;
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, Error> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// Every mutation rewrites the whole file through a sibling temp file and a
/// rename, so readers never see a torn file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file exists but cannot be read or is
    /// not a JSON object of strings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(Error::Storage(format!("{}: {e}", path.display()))),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, mutate: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), Error> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("file store lock poisoned".into()))?;

        let mut next = entries.clone();
        mutate(&mut next);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), Error> {
        let storage_err = |e: std::io::Error| Error::Storage(format!("{}: {e}", self.path.display()));

        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(storage_err)?;
        std::fs::rename(&tmp, &self.path).map_err(storage_err)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("file store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// Session persistence over a [`KeyValueStore`].
#[derive(Debug)]
pub struct SessionStore<S> {
    backend: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    #[must_use]
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Read the persisted session.
    ///
    /// Returns `None` unless both `jwt` and `user_id` are present and non-empty.
    pub fn load(&self) -> Result<Option<Session>, Error> {
        let jwt = self.non_empty(JWT_KEY)?;
        let user_id = self.non_empty(USER_ID_KEY)?;

        Ok(match (jwt, user_id) {
            (Some(jwt), Some(user_id)) => Some(Session::new(Jwt::new(jwt), UserId(user_id))),
            (None, None) => None,
            _ => {
                tracing::warn!("Ignoring half-written session in storage");
                None
            }
        })
    }

    /// Persist a session.
    ///
    /// If the second write fails, the first key is restored to its previous
    /// value before the error is returned.
    pub fn save(&self, session: &Session) -> Result<(), Error> {
        let previous_user_id = self.backend.get(USER_ID_KEY)?;

        self.backend.set(USER_ID_KEY, session.user_id.as_str())?;

        if let Err(e) = self.backend.set(JWT_KEY, session.jwt.as_str()) {
            let restored = match previous_user_id {
                Some(prev) => self.backend.set(USER_ID_KEY, &prev),
                None => self.backend.remove(USER_ID_KEY),
            };
            if let Err(rollback) = restored {
                tracing::error!(error = %rollback, "Session rollback failed");
            }
            return Err(e);
        }

        Ok(())
    }

    /// Remove both session keys. Idempotent.
    pub fn clear(&self) -> Result<(), Error> {
        let jwt = self.backend.remove(JWT_KEY);
        let user_id = self.backend.remove(USER_ID_KEY);
        jwt.and(user_id)
    }

    pub fn save_code_verifier(&self, verifier: &str) -> Result<(), Error> {
        self.backend.set(CODE_VERIFIER_KEY, verifier)
    }

    /// Read and remove the transient PKCE verifier.
    pub fn take_code_verifier(&self) -> Result<Option<String>, Error> {
        let verifier = self.non_empty(CODE_VERIFIER_KEY)?;
        self.backend.remove(CODE_VERIFIER_KEY)?;
        Ok(verifier)
    }

    fn non_empty(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.backend.get(key)?.filter(|v| !v.is_empty()))
    }
}
