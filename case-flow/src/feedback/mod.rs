//! Feedback sub-pipelines.
//!
//! * History: `analyze_history` → `synthesize_history_domains`. The second
//!   stage reads the analysis back from the stored session, so the two can run
//!   as separate requests.
//! * Diagnosis: three independent judgments run concurrently and are stored
//!   together under `feedback.diagnosis`.
//! * Treatment: one judgment over the full session snapshot.
//! * OSCE: grades the station answers; normally followed by finalization.
//!
//! A malformed oracle reply is a hard error here. Nothing is recorded for the
//! failing stage.

pub mod judgments;
mod prompts;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    catalog::CaseRepository,
    error::{CaseFlowError, Result},
    lifecycle::SessionManager,
    oracle::{EvaluationOracle, OraclePrompt, parse_judgment},
    session::{FeedbackStage, Session, SessionKey},
};
use judgments::{
    DiagnosisFeedback, DifferentialJudgment, EducationalCapsules, HistoryAnalysis,
    HistoryDomainFeedback, OsceAnswer, OsceScore, PrimaryDiagnosisJudgment, TreatmentFeedback,
};
use prompts::*;

#[derive(Clone)]
pub struct FeedbackOrchestrator {
    sessions: SessionManager,
    cases: Arc<dyn CaseRepository>,
    oracle: Arc<dyn EvaluationOracle>,
}

impl FeedbackOrchestrator {
    pub fn new(
        sessions: SessionManager,
        cases: Arc<dyn CaseRepository>,
        oracle: Arc<dyn EvaluationOracle>,
    ) -> Self {
        Self {
            sessions,
            cases,
            oracle,
        }
    }

    /// Sends one prompt and parses the reply into `T`.
    async fn judge<T: DeserializeOwned>(&self, prompt: OraclePrompt) -> Result<T> {
        info!(stage = %prompt.stage, "requesting feedback judgment");
        let raw = self.oracle.judge(&prompt).await?;
        parse_judgment(&prompt.stage, &raw).inspect_err(|e| {
            error!(stage = %prompt.stage, error = %e, "feedback judgment rejected");
        })
    }

    async fn store<T: Serialize>(
        &self,
        key: &SessionKey,
        stage: FeedbackStage,
        judgment: &T,
    ) -> Result<Session> {
        let data = serde_json::to_value(judgment)?;
        self.sessions.record_stage_feedback(key, stage, data).await
    }

    pub async fn analyze_history(&self, key: &SessionKey) -> Result<HistoryAnalysis> {
        let session = self.sessions.require(key).await?;
        let case = self.cases.load_case(&key.case_id).await?;

        let asked: Vec<Value> = session
            .interactions
            .history_taking
            .iter()
            .map(|h| json!({"question": h.question, "response": h.response}))
            .collect();

        let prompt = OraclePrompt::new(
            FeedbackStage::HistoryAnalysis.key(),
            HISTORY_ANALYSIS_PROMPT,
            json!({
                "history_context": case.context.history_context,
                "expected_questions": case.expected_questions,
                "student_history": asked,
            }),
        );
        let analysis: HistoryAnalysis = self.judge(prompt).await?;

        self.store(key, FeedbackStage::HistoryAnalysis, &analysis)
            .await?;
        info!(
            student_id = %key.student_id,
            case_id = %key.case_id,
            missed = analysis.missed_questions.len(),
            "history analysis recorded"
        );
        Ok(analysis)
    }

    /// Requires `history_analysis` to be stored already.
    pub async fn synthesize_history_domains(
        &self,
        key: &SessionKey,
    ) -> Result<HistoryDomainFeedback> {
        let session = self.sessions.require(key).await?;
        let stored = session
            .feedback(FeedbackStage::HistoryAnalysis)
            .ok_or(CaseFlowError::PrerequisiteMissing {
                stage: FeedbackStage::HistoryTaking,
                missing: FeedbackStage::HistoryAnalysis,
            })?;
        let analysis: HistoryAnalysis = serde_json::from_value(stored.data.clone())?;

        let case = self.cases.load_case(&key.case_id).await?;
        let domains: BTreeSet<&str> = case
            .expected_questions
            .iter()
            .map(|q| q.domain.as_str())
            .collect();

        let prompt = OraclePrompt::new(
            FeedbackStage::HistoryTaking.key(),
            HISTORY_DOMAIN_PROMPT,
            json!({
                "analysis": analysis,
                "domains": domains,
            }),
        );
        let synthesis: HistoryDomainFeedback = self.judge(prompt).await?;

        self.store(key, FeedbackStage::HistoryTaking, &synthesis)
            .await?;
        info!(
            student_id = %key.student_id,
            case_id = %key.case_id,
            cumulative_score = synthesis.cumulative_score,
            "history domain feedback recorded"
        );
        Ok(synthesis)
    }

    pub async fn evaluate_diagnosis(&self, key: &SessionKey) -> Result<DiagnosisFeedback> {
        let session = self.sessions.require(key).await?;
        let interactions = &session.interactions;
        let submission = interactions
            .diagnosis_submission
            .as_ref()
            .ok_or(CaseFlowError::MissingInteraction("diagnosis_submission"))?;
        let context = self.cases.case_context(&key.case_id).await?;

        let primary_prompt = OraclePrompt::new(
            "diagnosis_primary",
            PRIMARY_DIAGNOSIS_PROMPT,
            json!({
                "diagnosis_context": context.diagnosis_context,
                "history_context": context.history_context,
                "diagnosis_submission": submission,
                "final_diagnosis": interactions.final_diagnosis,
                "physical_examinations": interactions.physical_examinations,
                "tests_ordered": interactions.tests_ordered,
                "clinical_findings": interactions.clinical_findings,
            }),
        );
        let differential_prompt = OraclePrompt::new(
            "diagnosis_differentials",
            DIFFERENTIAL_PROMPT,
            json!({
                "diagnosis_context": context.diagnosis_context,
                "primary_diagnosis": submission.primary_diagnosis,
                "differentials": submission.differentials,
                "clinical_findings": interactions.clinical_findings,
            }),
        );
        let capsules_prompt = OraclePrompt::new(
            "diagnosis_capsules",
            CAPSULES_PROMPT,
            json!({
                "diagnosis_context": context.diagnosis_context,
                "history_context": context.history_context,
                "diagnosis_submission": submission,
            }),
        );

        let (primary, differentials, capsules) = tokio::try_join!(
            self.judge::<PrimaryDiagnosisJudgment>(primary_prompt),
            self.judge::<DifferentialJudgment>(differential_prompt),
            self.judge::<EducationalCapsules>(capsules_prompt),
        )?;

        let feedback = DiagnosisFeedback {
            primary,
            differentials,
            capsules: capsules.capsules,
        };
        self.store(key, FeedbackStage::Diagnosis, &feedback).await?;
        info!(
            student_id = %key.student_id,
            case_id = %key.case_id,
            diagnosis_accuracy = feedback.primary.diagnosis_accuracy,
            differential_match = feedback.differentials.differential_match,
            "diagnosis feedback recorded"
        );
        Ok(feedback)
    }

    pub async fn evaluate_treatment(&self, key: &SessionKey) -> Result<TreatmentFeedback> {
        let session = self.sessions.require(key).await?;
        if session.interactions.treatment_plan.is_none() {
            return Err(CaseFlowError::MissingInteraction("treatment_plan"));
        }
        let context = self.cases.case_context(&key.case_id).await?;

        let prompt = OraclePrompt::new(
            FeedbackStage::Treatment.key(),
            TREATMENT_PROMPT,
            json!({
                "treatment_context": context.treatment_context,
                "history_context": context.history_context,
                "session": session.interactions,
            }),
        );
        let feedback: TreatmentFeedback = self.judge(prompt).await?;

        self.store(key, FeedbackStage::Treatment, &feedback).await?;
        info!(
            student_id = %key.student_id,
            case_id = %key.case_id,
            score = feedback.score,
            "treatment feedback recorded"
        );
        Ok(feedback)
    }

    /// Grades the OSCE answers and records them as `feedback.osce_score`.
    pub async fn score_osce(&self, key: &SessionKey, answers: &[OsceAnswer]) -> Result<Session> {
        self.sessions.require(key).await?;
        if answers.is_empty() {
            return Err(CaseFlowError::MissingInteraction("osce_answers"));
        }
        let context = self.cases.case_context(&key.case_id).await?;

        let prompt = OraclePrompt::new(
            FeedbackStage::OsceScore.key(),
            OSCE_PROMPT,
            json!({
                "diagnosis_context": context.diagnosis_context,
                "treatment_context": context.treatment_context,
                "answers": answers,
            }),
        );
        let score: OsceScore = self.judge(prompt).await?;

        info!(
            student_id = %key.student_id,
            case_id = %key.case_id,
            total_score = score.total_score,
            max_score = score.max_score,
            "osce score recorded"
        );
        self.store(key, FeedbackStage::OsceScore, &score).await
    }
}
