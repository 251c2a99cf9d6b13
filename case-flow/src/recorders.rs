//! Stage recorders. Each one mutates exactly one sub-section of the session,
//! stamps `current_step` and saves.

use chrono::Utc;
use serde_json::Value;

use crate::{
    error::Result,
    lifecycle::SessionManager,
    session::{
        CaseStep, DiagnosisSubmission, FeedbackEntry, FeedbackStage, FinalDiagnosis,
        HistoryExchange, MonitoringPlan, Session, SessionKey, TestCategory, TestOrder,
        TreatmentPlan,
    },
};

impl SessionManager {
    pub async fn record_history_exchange(
        &self,
        key: &SessionKey,
        question: &str,
        response: &str,
    ) -> Result<Session> {
        let exchange = HistoryExchange {
            question: question.to_string(),
            response: response.to_string(),
            timestamp: Utc::now(),
        };
        self.update(key, CaseStep::HistoryTaking, |s| {
            s.interactions.history_taking.push(exchange.clone())
        })
        .await
    }

    pub async fn record_test_order(
        &self,
        key: &SessionKey,
        category: TestCategory,
        test_name: &str,
    ) -> Result<Session> {
        let order = TestOrder {
            test_name: test_name.to_string(),
            timestamp: Utc::now(),
        };
        let step = match category {
            TestCategory::PhysicalExam => CaseStep::PhysicalExamination,
            TestCategory::LabTest => CaseStep::TestOrdering,
        };
        self.update(key, step, |s| {
            s.interactions.orders_mut(category).push(order.clone())
        })
        .await
    }

    pub async fn record_clinical_finding(&self, key: &SessionKey, finding: &str) -> Result<Session> {
        self.update(key, CaseStep::ClinicalFindings, |s| {
            s.interactions.clinical_findings.push(finding.to_string())
        })
        .await
    }

    pub async fn record_diagnosis_submission(
        &self,
        key: &SessionKey,
        primary_diagnosis: &str,
        reason: &str,
        differentials: &[String],
    ) -> Result<Session> {
        let submission = DiagnosisSubmission {
            primary_diagnosis: primary_diagnosis.to_string(),
            reason: reason.to_string(),
            differentials: differentials.to_vec(),
            timestamp: Utc::now(),
        };
        self.update(key, CaseStep::DiagnosisSubmission, |s| {
            s.interactions.diagnosis_submission = Some(submission.clone())
        })
        .await
    }

    pub async fn record_final_diagnosis(
        &self,
        key: &SessionKey,
        final_diagnosis: &str,
        final_reason: &str,
    ) -> Result<Session> {
        let record = FinalDiagnosis {
            final_diagnosis: final_diagnosis.to_string(),
            final_reason: final_reason.to_string(),
            timestamp: Utc::now(),
        };
        self.update(key, CaseStep::FinalDiagnosis, |s| {
            s.interactions.final_diagnosis = Some(record.clone())
        })
        .await
    }

    pub async fn record_treatment_plan(
        &self,
        key: &SessionKey,
        treatment_steps: &[String],
    ) -> Result<Session> {
        let plan = TreatmentPlan {
            treatment_steps: treatment_steps.to_vec(),
            timestamp: Utc::now(),
        };
        self.update(key, CaseStep::TreatmentPlan, |s| {
            s.interactions.treatment_plan = Some(plan.clone())
        })
        .await
    }

    /// Replaces the monitoring slot and both mirror arrays.
    pub async fn record_monitoring_plan(
        &self,
        key: &SessionKey,
        pre_treatment_checks: &[String],
        post_treatment_monitoring: &[String],
    ) -> Result<Session> {
        let plan = MonitoringPlan {
            pre_treatment_checks: pre_treatment_checks.to_vec(),
            post_treatment_monitoring: post_treatment_monitoring.to_vec(),
            timestamp: Utc::now(),
        };
        self.update(key, CaseStep::Monitoring, |s| {
            s.interactions.pre_treatment_checks = plan.pre_treatment_checks.clone();
            s.interactions.post_treatment_monitoring = plan.post_treatment_monitoring.clone();
            s.interactions.monitoring = Some(plan.clone());
        })
        .await
    }

    /// Replaces `feedback.<stage>`; sibling entries are left alone.
    pub async fn record_stage_feedback(
        &self,
        key: &SessionKey,
        stage: FeedbackStage,
        data: Value,
    ) -> Result<Session> {
        let entry = FeedbackEntry {
            data,
            timestamp: Utc::now(),
        };
        self.update(key, stage.step(), |s| {
            s.interactions.feedback.insert(stage, entry.clone());
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemorySessionStore;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (SessionManager, SessionKey) {
        (
            SessionManager::new(Arc::new(InMemorySessionStore::new())),
            SessionKey::new("student-9", "case-3"),
        )
    }

    #[tokio::test]
    async fn list_lengths_match_number_of_calls() {
        let (sessions, key) = setup();

        for i in 0..3 {
            sessions
                .record_history_exchange(&key, &format!("q{i}"), "a")
                .await
                .unwrap();
        }
        for name in ["Inspection", "Palpation"] {
            sessions
                .record_test_order(&key, TestCategory::PhysicalExam, name)
                .await
                .unwrap();
        }
        sessions
            .record_test_order(&key, TestCategory::LabTest, "CBC")
            .await
            .unwrap();
        for finding in ["fever", "rash", "arthralgia", "fatigue"] {
            sessions.record_clinical_finding(&key, finding).await.unwrap();
        }

        let session = sessions.require(&key).await.unwrap();
        let i = &session.interactions;
        assert_eq!(i.history_taking.len(), 3);
        assert_eq!(i.physical_examinations.len(), 2);
        assert_eq!(i.tests_ordered.len(), 1);
        assert_eq!(i.clinical_findings.len(), 4);
        assert_eq!(i.history_taking[1].question, "q1");
        assert_eq!(session.current_step, Some(CaseStep::ClinicalFindings));
    }

    #[tokio::test]
    async fn recorders_create_missing_sessions() {
        let (sessions, key) = setup();
        let session = sessions
            .record_history_exchange(&key, "Any fever?", "Yes, for a week.")
            .await
            .unwrap();
        assert_eq!(session.current_step, Some(CaseStep::HistoryTaking));
        assert_eq!(session.interactions.history_taking.len(), 1);
    }

    #[tokio::test]
    async fn slots_replace_rather_than_merge() {
        let (sessions, key) = setup();
        sessions
            .record_diagnosis_submission(&key, "SLE", "malar rash", &["RA".to_string()])
            .await
            .unwrap();
        let session = sessions
            .record_diagnosis_submission(&key, "Dermatomyositis", "heliotrope rash", &[])
            .await
            .unwrap();

        let submission = session.interactions.diagnosis_submission.unwrap();
        assert_eq!(submission.primary_diagnosis, "Dermatomyositis");
        assert!(submission.differentials.is_empty());
    }

    #[tokio::test]
    async fn monitoring_plan_is_mirrored() {
        let (sessions, key) = setup();
        sessions
            .record_monitoring_plan(&key, &["baseline LFT".into()], &["CBC weekly".into()])
            .await
            .unwrap();
        let session = sessions
            .record_monitoring_plan(&key, &["eye exam".into()], &[])
            .await
            .unwrap();

        let i = &session.interactions;
        assert_eq!(i.pre_treatment_checks, vec!["eye exam"]);
        assert!(i.post_treatment_monitoring.is_empty());
        assert_eq!(i.monitoring.as_ref().unwrap().pre_treatment_checks, vec!["eye exam"]);
        assert_eq!(session.current_step, Some(CaseStep::Monitoring));
    }

    #[tokio::test]
    async fn stage_feedback_preserves_siblings() {
        let (sessions, key) = setup();
        sessions
            .record_stage_feedback(&key, FeedbackStage::HistoryAnalysis, json!({"score": 1}))
            .await
            .unwrap();
        sessions
            .record_stage_feedback(&key, FeedbackStage::Diagnosis, json!({"score": 2}))
            .await
            .unwrap();
        let session = sessions
            .record_stage_feedback(&key, FeedbackStage::HistoryAnalysis, json!({"score": 3}))
            .await
            .unwrap();

        assert_eq!(session.interactions.feedback.len(), 2);
        assert_eq!(
            session.feedback(FeedbackStage::HistoryAnalysis).unwrap().data,
            json!({"score": 3})
        );
        assert_eq!(
            session.feedback(FeedbackStage::Diagnosis).unwrap().data,
            json!({"score": 2})
        );
        assert_eq!(session.current_step, Some(CaseStep::HistoryFeedback));
    }

    #[tokio::test]
    async fn reset_after_recording_leaves_empty_session() {
        let (sessions, key) = setup();
        sessions.record_final_diagnosis(&key, "SLE", "ANA+").await.unwrap();
        sessions
            .record_treatment_plan(&key, &["hydroxychloroquine".into()])
            .await
            .unwrap();

        sessions.reset(&key).await.unwrap();
        let session = sessions.get(&key).await.unwrap().unwrap();
        assert!(session.interactions.final_diagnosis.is_none());
        assert!(session.interactions.treatment_plan.is_none());
        assert!(session.current_step.is_none());
    }
}
