use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one student's attempt at one case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub student_id: String,
    pub case_id: String,
}

impl SessionKey {
    pub fn new(student_id: impl Into<String>, case_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            case_id: case_id.into(),
        }
    }

    /// Flat string form used by the storage backends.
    pub fn storage_key(&self) -> String {
        format!("{}::{}", self.student_id, self.case_id)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Label of the last pipeline stage that touched a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStep {
    HistoryTaking,
    PhysicalExamination,
    TestOrdering,
    ClinicalFindings,
    DiagnosisSubmission,
    FinalDiagnosis,
    TreatmentPlan,
    Monitoring,
    HistoryFeedback,
    DiagnosisFeedback,
    TreatmentFeedback,
    OsceScore,
}

/// Category of an orderable test in the case catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    PhysicalExam,
    LabTest,
}

impl TestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestCategory::PhysicalExam => "physical_exam",
            TestCategory::LabTest => "lab_test",
        }
    }
}

impl fmt::Display for TestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys of the feedback map. Each sub-pipeline writes exactly one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStage {
    /// Raw analysis of the student's history taking.
    HistoryAnalysis,
    /// Per-domain synthesis built from the stored analysis.
    HistoryTaking,
    Diagnosis,
    Treatment,
    OsceScore,
}

impl FeedbackStage {
    pub fn key(&self) -> &'static str {
        match self {
            FeedbackStage::HistoryAnalysis => "history_analysis",
            FeedbackStage::HistoryTaking => "history_taking",
            FeedbackStage::Diagnosis => "diagnosis",
            FeedbackStage::Treatment => "treatment",
            FeedbackStage::OsceScore => "osce_score",
        }
    }

    pub fn step(&self) -> CaseStep {
        match self {
            FeedbackStage::HistoryAnalysis | FeedbackStage::HistoryTaking => {
                CaseStep::HistoryFeedback
            }
            FeedbackStage::Diagnosis => CaseStep::DiagnosisFeedback,
            FeedbackStage::Treatment => CaseStep::TreatmentFeedback,
            FeedbackStage::OsceScore => CaseStep::OsceScore,
        }
    }
}

impl fmt::Display for FeedbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryExchange {
    pub question: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOrder {
    pub test_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisSubmission {
    pub primary_diagnosis: String,
    pub reason: String,
    #[serde(default)]
    pub differentials: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDiagnosis {
    pub final_diagnosis: String,
    pub final_reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentPlan {
    pub treatment_steps: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringPlan {
    pub pre_treatment_checks: Vec<String>,
    pub post_treatment_monitoring: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Oracle judgment stored under one feedback key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Everything the student did during the attempt.
///
/// Lists are append-only; `Option` slots hold the latest value only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interactions {
    pub history_taking: Vec<HistoryExchange>,
    pub physical_examinations: Vec<TestOrder>,
    pub tests_ordered: Vec<TestOrder>,
    pub clinical_findings: Vec<String>,
    pub diagnosis_submission: Option<DiagnosisSubmission>,
    pub final_diagnosis: Option<FinalDiagnosis>,
    pub treatment_plan: Option<TreatmentPlan>,
    pub monitoring: Option<MonitoringPlan>,
    pub pre_treatment_checks: Vec<String>,
    pub post_treatment_monitoring: Vec<String>,
    pub feedback: BTreeMap<FeedbackStage, FeedbackEntry>,
}

impl Interactions {
    pub fn orders(&self, category: TestCategory) -> &[TestOrder] {
        match category {
            TestCategory::PhysicalExam => &self.physical_examinations,
            TestCategory::LabTest => &self.tests_ordered,
        }
    }

    pub fn orders_mut(&mut self, category: TestCategory) -> &mut Vec<TestOrder> {
        match category {
            TestCategory::PhysicalExam => &mut self.physical_examinations,
            TestCategory::LabTest => &mut self.tests_ordered,
        }
    }
}

/// The per-attempt interaction ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub student_id: String,
    pub case_id: String,
    pub session_start: DateTime<Utc>,
    pub current_step: Option<CaseStep>,
    pub interactions: Interactions,
    /// Optimistic concurrency token, managed by the store.
    #[serde(default)]
    pub version: u64,
}

impl Session {
    /// Canonical empty shape for a fresh attempt.
    pub fn new(key: &SessionKey) -> Self {
        Self {
            student_id: key.student_id.clone(),
            case_id: key.case_id.clone(),
            session_start: Utc::now(),
            current_step: None,
            interactions: Interactions::default(),
            version: 0,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.student_id.clone(), self.case_id.clone())
    }

    pub fn feedback(&self, stage: FeedbackStage) -> Option<&FeedbackEntry> {
        self.interactions.feedback.get(&stage)
    }

    pub fn is_pristine(&self) -> bool {
        self.current_step.is_none() && self.interactions == Interactions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_canonical_empty_shape() {
        let session = Session::new(&SessionKey::new("s1", "case-7"));
        assert!(session.is_pristine());
        assert_eq!(session.version, 0);
        assert!(session.interactions.diagnosis_submission.is_none());
        assert!(session.interactions.feedback.is_empty());
    }

    #[test]
    fn feedback_map_serializes_with_stage_keys() {
        let mut session = Session::new(&SessionKey::new("s1", "case-7"));
        session.interactions.feedback.insert(
            FeedbackStage::OsceScore,
            FeedbackEntry {
                data: serde_json::json!({"total_score": 8}),
                timestamp: Utc::now(),
            },
        );

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(
            value["interactions"]["feedback"]["osce_score"]["data"]["total_score"],
            8
        );

        let back: Session = serde_json::from_value(value).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn missing_interaction_fields_default_to_empty() {
        let value = serde_json::json!({
            "student_id": "s1",
            "case_id": "c1",
            "session_start": "2024-05-01T10:00:00Z",
            "current_step": null,
            "interactions": {}
        });
        let session: Session = serde_json::from_value(value).unwrap();
        assert!(session.interactions.history_taking.is_empty());
        assert_eq!(session.version, 0);
    }
}
