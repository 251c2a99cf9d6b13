//! Creates, loads and resets sessions, and wraps every stage write in a
//! load, mutate, save cycle.
//!
//! The store handle is injected; nothing here constructs its own store.
//!
//! ## Concurrent writers
//! Writes are optimistic. A mutation is applied to the freshly loaded session
//! and saved with the version it was loaded at. If another writer got there
//! first the store reports a conflict, the session is loaded again and the
//! same mutation is re-applied. Two concurrent appends to one key therefore
//! both land; neither silently overwrites the other.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    error::{CaseFlowError, Result},
    session::{CaseStep, Session, SessionKey},
    storage::SessionStore,
};

pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    max_retries: u32,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Number of conflict retries before a write gives up.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns the existing session unchanged, or saves and returns a fresh one.
    pub async fn create_or_load(&self, key: &SessionKey) -> Result<Session> {
        if let Some(session) = self.store.load(key).await? {
            return Ok(session);
        }

        let mut session = Session::new(key);
        match self.store.save(key, &session).await {
            Ok(version) => {
                info!(student_id = %key.student_id, case_id = %key.case_id, "session created");
                session.version = version;
                Ok(session)
            }
            // Someone else created it between our load and save.
            Err(CaseFlowError::VersionConflict { .. }) => self
                .store
                .load(key)
                .await?
                .ok_or_else(|| CaseFlowError::SessionNotFound(key.storage_key())),
            Err(e) => Err(e),
        }
    }

    /// Discards every interaction and overwrites the record with a fresh shape.
    pub async fn reset(&self, key: &SessionKey) -> Result<Session> {
        let mut attempts = 0;
        loop {
            let current_version = self
                .store
                .load(key)
                .await?
                .map(|s| s.version)
                .unwrap_or(0);

            let mut fresh = Session::new(key);
            fresh.version = current_version;

            match self.store.save(key, &fresh).await {
                Ok(version) => {
                    fresh.version = version;
                    info!(student_id = %key.student_id, case_id = %key.case_id, "session reset");
                    return Ok(fresh);
                }
                Err(CaseFlowError::VersionConflict { .. }) if attempts < self.max_retries => {
                    attempts += 1;
                    warn!(session_key = %key, attempts, "reset raced with another writer, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read-only fetch. Absence means there is no active attempt.
    pub async fn get(&self, key: &SessionKey) -> Result<Option<Session>> {
        self.store.load(key).await
    }

    /// Like [`get`](Self::get) but absence is an error.
    pub async fn require(&self, key: &SessionKey) -> Result<Session> {
        self.store
            .load(key)
            .await?
            .ok_or_else(|| CaseFlowError::SessionNotFound(key.storage_key()))
    }

    /// Loads (or creates) the session, applies `mutate`, stamps `step` and
    /// saves. Re-applies `mutate` on a version conflict.
    pub async fn update<F>(&self, key: &SessionKey, step: CaseStep, mutate: F) -> Result<Session>
    where
        F: Fn(&mut Session) + Send + Sync,
    {
        let mut attempts = 0;
        loop {
            let mut session = self.create_or_load(key).await?;
            mutate(&mut session);
            session.current_step = Some(step);

            match self.store.save(key, &session).await {
                Ok(version) => {
                    session.version = version;
                    debug!(session_key = %key, step = ?step, version, "stage recorded");
                    return Ok(session);
                }
                Err(CaseFlowError::VersionConflict { .. }) if attempts < self.max_retries => {
                    attempts += 1;
                    warn!(session_key = %key, step = ?step, attempts, "write conflict, re-applying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
