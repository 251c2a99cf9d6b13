use std::sync::Arc;

use crate::{
    archive::AttemptArchive,
    catalog::CaseRepository,
    coverage::CoverageTracker,
    error::Result,
    feedback::FeedbackOrchestrator,
    lifecycle::SessionManager,
    oracle::EvaluationOracle,
    resolver::TestOrderResolver,
    rubric::{AttemptRecord, Finalizer},
    session::SessionKey,
    storage::SessionStore,
};

/// All pipeline components wired to the same store, case content and oracle.
#[derive(Clone)]
pub struct CasePipeline {
    pub sessions: SessionManager,
    pub resolver: TestOrderResolver,
    pub coverage: CoverageTracker,
    pub feedback: FeedbackOrchestrator,
    pub finalizer: Finalizer,
}

impl CasePipeline {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cases: Arc<dyn CaseRepository>,
        oracle: Arc<dyn EvaluationOracle>,
        archive: Arc<dyn AttemptArchive>,
    ) -> Self {
        Self::with_sessions(SessionManager::new(store), cases, oracle, archive)
    }

    pub fn with_sessions(
        sessions: SessionManager,
        cases: Arc<dyn CaseRepository>,
        oracle: Arc<dyn EvaluationOracle>,
        archive: Arc<dyn AttemptArchive>,
    ) -> Self {
        Self {
            resolver: TestOrderResolver::new(sessions.clone(), cases.clone(), oracle.clone()),
            coverage: CoverageTracker::new(sessions.clone(), cases.clone(), oracle.clone()),
            feedback: FeedbackOrchestrator::new(sessions.clone(), cases, oracle),
            finalizer: Finalizer::new(archive),
            sessions,
        }
    }

    /// Loads the attempt and writes its final record.
    pub async fn finalize(&self, key: &SessionKey, department: &str) -> Result<AttemptRecord> {
        let session = self.sessions.require(key).await?;
        self.finalizer.finalize(&session, department).await
    }
}
