pub mod archive;
pub mod catalog;
pub mod coverage;
pub mod error;
pub mod feedback;
pub mod lifecycle;
pub mod oracle;
pub mod pipeline;
pub mod recorders;
pub mod resolver;
pub mod rubric;
pub mod session;
pub mod storage;
pub mod storage_postgres;

// Re-export commonly used types
pub use archive::{AttemptArchive, InMemoryAttemptArchive, PostgresAttemptArchive};
pub use catalog::{
    CaseContent, CaseContext, CaseRepository, ExpectedQuestion, FileCaseRepository,
    StaticCaseRepository,
};
pub use coverage::{CoverageReport, CoverageStat, CoverageTracker};
pub use error::{CaseFlowError, Result};
pub use feedback::FeedbackOrchestrator;
pub use feedback::judgments::OsceAnswer;
pub use lifecycle::SessionManager;
pub use oracle::{EvaluationOracle, OraclePrompt, ScriptedOracle};
#[cfg(feature = "rig")]
pub use oracle::{OracleConfig, OracleProvider, RigOracle};
pub use pipeline::CasePipeline;
pub use resolver::{MatchJudgment, TestOrderResolver, TestResolution};
pub use rubric::{AttemptRecord, Finalizer, RubricScores, extract_rubric_scores};
pub use session::{CaseStep, FeedbackStage, Session, SessionKey, TestCategory};
pub use storage::{FileSessionStore, InMemorySessionStore, SessionStore};
pub use storage_postgres::PostgresSessionStore;
