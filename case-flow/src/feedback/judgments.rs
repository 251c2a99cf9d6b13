//! Typed shapes of oracle judgments. Parsing is strict: scores are required,
//! free-text fields default to empty.

use serde::{Deserialize, Serialize};

use crate::catalog::ExpectedQuestion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryAnalysis {
    #[serde(default)]
    pub well_asked: Vec<String>,
    #[serde(default)]
    pub missed_questions: Vec<ExpectedQuestion>,
    #[serde(default)]
    pub communication_notes: String,
    pub completeness_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainFeedback {
    pub domain: String,
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDomainFeedback {
    pub domains: Vec<DomainFeedback>,
    pub cumulative_score: f64,
    #[serde(default)]
    pub overall_feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryDiagnosisJudgment {
    pub diagnosis_accuracy: f64,
    pub reasoning_quality: f64,
    pub physical_exam_score: f64,
    pub test_ordering_score: f64,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialJudgment {
    pub differential_match: f64,
    #[serde(default)]
    pub matched: Vec<String>,
    #[serde(default)]
    pub missed: Vec<String>,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EducationalCapsule {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EducationalCapsules {
    pub capsules: Vec<EducationalCapsule>,
}

/// Stored under `feedback.diagnosis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisFeedback {
    pub primary: PrimaryDiagnosisJudgment,
    pub differentials: DifferentialJudgment,
    pub capsules: Vec<EducationalCapsule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentFeedback {
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub safety_concerns: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// One OSCE question as answered by the student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsceAnswer {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsceQuestionScore {
    pub question: String,
    pub score: f64,
    pub max_score: f64,
    #[serde(default)]
    pub feedback: String,
}

/// Stored under `feedback.osce_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsceScore {
    pub total_score: f64,
    pub max_score: f64,
    pub questions: Vec<OsceQuestionScore>,
    #[serde(default)]
    pub summary: String,
}
