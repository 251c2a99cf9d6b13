use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::{CaseFlowError, Result},
    session::{Session, SessionKey},
};

/// Key/value persistence of one `Session` per key.
///
/// `save` is a compare-and-swap on `Session::version`: it succeeds only if the
/// stored record's version equals `session.version` (0 meaning "no record
/// yet"), and returns the new version. Each successful save fully replaces the
/// previous record.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>>;
    async fn save(&self, key: &SessionKey, session: &Session) -> Result<u64>;
}

fn conflict(key: &SessionKey, expected: u64, found: u64) -> CaseFlowError {
    CaseFlowError::VersionConflict {
        key: key.storage_key(),
        expected,
        found,
    }
}

/// In-memory implementation of SessionStore
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .get(&key.storage_key())
            .map(|entry| entry.clone()))
    }

    async fn save(&self, key: &SessionKey, session: &Session) -> Result<u64> {
        match self.sessions.entry(key.storage_key()) {
            Entry::Occupied(mut entry) => {
                let found = entry.get().version;
                if found != session.version {
                    return Err(conflict(key, session.version, found));
                }
                let mut stored = session.clone();
                stored.version = found + 1;
                entry.insert(stored);
                Ok(found + 1)
            }
            Entry::Vacant(entry) => {
                if session.version != 0 {
                    return Err(conflict(key, session.version, 0));
                }
                let mut stored = session.clone();
                stored.version = 1;
                entry.insert(stored);
                Ok(1)
            }
        }
    }
}

/// One JSON file per session key.
///
/// Writes go through a temp file and an atomic rename. The version check and
/// the write happen under a store-wide lock, so the compare-and-swap holds for
/// every writer sharing this instance.
pub struct FileSessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(file_name(key))
    }

    async fn read(&self, path: &Path) -> Result<Option<Session>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Percent-encoded storage key, so `::` and path separators never reach the
/// file system.
fn file_name(key: &SessionKey) -> String {
    format!("{}.json", urlencoding::encode(&key.storage_key()))
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>> {
        self.read(&self.path_for(key)).await
    }

    async fn save(&self, key: &SessionKey, session: &Session) -> Result<u64> {
        let path = self.path_for(key);
        let _guard = self.write_lock.lock().await;

        let found = self.read(&path).await?.map(|s| s.version).unwrap_or(0);
        if found != session.version {
            return Err(conflict(key, session.version, found));
        }

        let mut stored = session.clone();
        stored.version = found + 1;
        let bytes = serde_json::to_vec_pretty(&stored)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), version = stored.version, "session file written");

        Ok(stored.version)
    }
}
