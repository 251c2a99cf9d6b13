//! Rubric aggregation and finalization of an attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    archive::AttemptArchive,
    error::{CaseFlowError, Result},
    session::{FeedbackStage, FinalDiagnosis, Interactions, Session},
};

/// Flat scorecard pulled out of the nested feedback entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RubricScores {
    pub history_taking: f64,
    pub physical_exam: f64,
    pub test_ordering: f64,
    pub diagnosis_accuracy: f64,
    pub reasoning_quality: f64,
    pub differential_match: f64,
}

impl RubricScores {
    pub fn total(&self) -> f64 {
        self.history_taking
            + self.physical_exam
            + self.test_ordering
            + self.diagnosis_accuracy
            + self.reasoning_quality
            + self.differential_match
    }
}

/// The immutable row written once per finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub student_id: String,
    pub case_id: String,
    pub department: String,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub interactions: Interactions,
    pub rubric: RubricScores,
    pub final_diagnosis: Option<FinalDiagnosis>,
    pub osce_summary: Value,
    pub feedback_summary: String,
}

fn score_at(session: &Session, stage: FeedbackStage, pointer: &str) -> f64 {
    session
        .feedback(stage)
        .and_then(|entry| entry.data.pointer(pointer))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Pure projection; any missing path scores 0.
pub fn extract_rubric_scores(session: &Session) -> RubricScores {
    RubricScores {
        history_taking: score_at(session, FeedbackStage::HistoryTaking, "/cumulative_score"),
        physical_exam: score_at(session, FeedbackStage::Diagnosis, "/primary/physical_exam_score"),
        test_ordering: score_at(session, FeedbackStage::Diagnosis, "/primary/test_ordering_score"),
        diagnosis_accuracy: score_at(
            session,
            FeedbackStage::Diagnosis,
            "/primary/diagnosis_accuracy",
        ),
        reasoning_quality: score_at(
            session,
            FeedbackStage::Diagnosis,
            "/primary/reasoning_quality",
        ),
        differential_match: score_at(
            session,
            FeedbackStage::Diagnosis,
            "/differentials/differential_match",
        ),
    }
}

fn text_at<'a>(session: &'a Session, stage: FeedbackStage, pointer: &str) -> Option<&'a str> {
    session
        .feedback(stage)
        .and_then(|entry| entry.data.pointer(pointer))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// One human-readable paragraph for the archive row.
pub fn summarize_feedback(session: &Session, rubric: &RubricScores) -> String {
    let mut lines = vec![format!(
        "History {:.1}/10; physical exam {:.1}/10; test ordering {:.1}/10; diagnosis accuracy {:.1}/10; reasoning {:.1}/10; differentials {:.1}/10.",
        rubric.history_taking,
        rubric.physical_exam,
        rubric.test_ordering,
        rubric.diagnosis_accuracy,
        rubric.reasoning_quality,
        rubric.differential_match,
    )];

    if let Some(entry) = session.feedback(FeedbackStage::OsceScore) {
        let total = entry.data.get("total_score").and_then(Value::as_f64);
        let max = entry.data.get("max_score").and_then(Value::as_f64);
        if let (Some(total), Some(max)) = (total, max) {
            lines.push(format!("OSCE {total:.1}/{max:.1}."));
        }
    }

    let narrative = [
        text_at(session, FeedbackStage::HistoryTaking, "/overall_feedback"),
        text_at(session, FeedbackStage::Diagnosis, "/primary/feedback"),
        text_at(session, FeedbackStage::Treatment, "/summary"),
    ];
    lines.extend(narrative.into_iter().flatten().map(str::to_string));

    lines.join(" ")
}

#[derive(Clone)]
pub struct Finalizer {
    archive: Arc<dyn AttemptArchive>,
}

impl Finalizer {
    pub fn new(archive: Arc<dyn AttemptArchive>) -> Self {
        Self { archive }
    }

    /// Builds a new record from `session` and writes it once. The session is
    /// not modified; each call produces a new record.
    pub async fn finalize(&self, session: &Session, department: &str) -> Result<AttemptRecord> {
        let rubric = extract_rubric_scores(session);
        let record = AttemptRecord {
            id: Uuid::new_v4(),
            student_id: session.student_id.clone(),
            case_id: session.case_id.clone(),
            department: department.to_string(),
            session_start: session.session_start,
            session_end: Utc::now(),
            interactions: session.interactions.clone(),
            rubric,
            final_diagnosis: session.interactions.final_diagnosis.clone(),
            osce_summary: session
                .feedback(FeedbackStage::OsceScore)
                .map(|entry| entry.data.clone())
                .unwrap_or(Value::Null),
            feedback_summary: summarize_feedback(session, &rubric),
        };

        self.archive.insert(&record).await.map_err(|e| {
            error!(
                student_id = %record.student_id,
                case_id = %record.case_id,
                error = %e,
                "attempt finalization failed"
            );
            CaseFlowError::Finalization(e.to_string())
        })?;

        info!(
            attempt_id = %record.id,
            student_id = %record.student_id,
            case_id = %record.case_id,
            total = rubric.total(),
            "attempt finalized"
        );
        Ok(record)
    }
}
