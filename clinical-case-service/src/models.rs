use case_flow::{
    AttemptRecord, ExpectedQuestion, OsceAnswer, RubricScores, Session, TestCategory,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryExchangeRequest {
    pub question: String,
    pub response: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageRequest {
    /// Still-uncovered expected questions; empty means the full catalog.
    pub uncovered: Vec<ExpectedQuestion>,
    /// When set, only this new exchange is judged instead of the stored history.
    pub question: Option<String>,
    pub response: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestOrderRequest {
    pub category: TestCategory,
    pub test_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClinicalFindingRequest {
    pub finding: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiagnosisRequest {
    pub primary_diagnosis: String,
    pub reason: String,
    #[serde(default)]
    pub differentials: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinalDiagnosisRequest {
    pub final_diagnosis: String,
    pub final_reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TreatmentRequest {
    pub treatment_steps: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MonitoringRequest {
    #[serde(default)]
    pub pre_treatment_checks: Vec<String>,
    #[serde(default)]
    pub post_treatment_monitoring: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OsceRequest {
    pub answers: Vec<OsceAnswer>,
    pub department: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub department: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_key: String,
    pub current_step: Option<String>,
    pub session: Session,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        let current_step = session
            .current_step
            .and_then(|step| serde_json::to_value(step).ok())
            .and_then(|v| v.as_str().map(str::to_string));
        Self {
            session_key: session.key().storage_key(),
            current_step,
            session,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizedResponse {
    pub attempt_id: Uuid,
    pub rubric: RubricScores,
    pub osce_summary: Value,
    pub feedback_summary: String,
}

impl From<AttemptRecord> for FinalizedResponse {
    fn from(record: AttemptRecord) -> Self {
        Self {
            attempt_id: record.id,
            rubric: record.rubric,
            osce_summary: record.osce_summary,
            feedback_summary: record.feedback_summary,
        }
    }
}
