use case_flow::{
    CaseContent, CaseContext, CaseFlowError, CasePipeline, ExpectedQuestion, FeedbackStage,
    InMemoryAttemptArchive, InMemorySessionStore, OsceAnswer, ScriptedOracle, SessionKey,
    StaticCaseRepository, TestCategory,
};
use serde_json::json;
use std::sync::Arc;

fn sle_case() -> CaseContent {
    CaseContent {
        case_id: "sle-01".into(),
        physical_exams: vec!["Skin inspection".into(), "Joint examination".into()],
        lab_tests: vec!["CBC".into(), "ANA".into()],
        expected_questions: vec![
            ExpectedQuestion::new("fever duration?", "HPI"),
            ExpectedQuestion::new("family history?", "FH"),
        ],
        context: CaseContext {
            history_context: json!({"chief_complaint": "fever and joint pain"}),
            diagnosis_context: json!({"diagnosis": "Systemic lupus erythematosus"}),
            treatment_context: json!({"first_line": "hydroxychloroquine"}),
        },
    }
}

struct Harness {
    pipeline: CasePipeline,
    oracle: Arc<ScriptedOracle>,
    archive: Arc<InMemoryAttemptArchive>,
}

fn harness() -> Harness {
    let oracle = Arc::new(ScriptedOracle::new());
    let archive = Arc::new(InMemoryAttemptArchive::new());
    let pipeline = CasePipeline::new(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(StaticCaseRepository::new().with_case(sle_case())),
        oracle.clone(),
        archive.clone(),
    );
    Harness {
        pipeline,
        oracle,
        archive,
    }
}

fn key() -> SessionKey {
    SessionKey::new("student-42", "sle-01")
}

#[tokio::test]
async fn cbc_match_then_malformed_reply() {
    let h = harness();
    h.oracle
        .push_reply(r#"{"match": true, "matched_test": "CBC", "reason": "same test"}"#);
    h.oracle.push_reply("{ not json");

    let first = h
        .pipeline
        .resolver
        .resolve(&key(), TestCategory::LabTest, "complete blood count")
        .await
        .unwrap();
    assert_eq!(first.session.interactions.tests_ordered.len(), 1);
    assert_eq!(first.session.interactions.tests_ordered[0].test_name, "CBC");

    let second = h
        .pipeline
        .resolver
        .resolve(&key(), TestCategory::LabTest, "anti-dsDNA")
        .await
        .unwrap();
    let orders = &second.session.interactions.tests_ordered;
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1].test_name, "anti-dsDNA");
    assert!(!second.judgment.is_match);
}

#[tokio::test]
async fn coverage_after_recorded_history() {
    let h = harness();
    h.pipeline
        .sessions
        .record_history_exchange(&key(), "How long have you had the fever?", "Five days.")
        .await
        .unwrap();
    h.oracle.push_reply(r#"{"covered": ["fever duration?"]}"#);

    let report = h.pipeline.coverage.track_session(&key(), &[]).await.unwrap();
    assert_eq!(report.domains["HPI"].percent_complete, 100);
    assert_eq!(report.domains["FH"].remaining, 1);
    assert_eq!(report.overall.total, 2);
    assert_eq!(report.overall.percent_complete, 50);
}

#[tokio::test]
async fn full_attempt_is_finalized_with_rubric() {
    let h = harness();
    let k = key();
    let sessions = &h.pipeline.sessions;

    sessions.reset(&k).await.unwrap();
    sessions
        .record_history_exchange(&k, "How long have you had the fever?", "Five days.")
        .await
        .unwrap();
    sessions
        .record_test_order(&k, TestCategory::PhysicalExam, "Skin inspection")
        .await
        .unwrap();
    sessions.record_clinical_finding(&k, "malar rash").await.unwrap();
    sessions
        .record_diagnosis_submission(&k, "SLE", "rash, arthritis, fever", &["RA".into()])
        .await
        .unwrap();
    sessions
        .record_final_diagnosis(&k, "Systemic lupus erythematosus", "ANA positive")
        .await
        .unwrap();
    sessions
        .record_treatment_plan(&k, &["hydroxychloroquine".into()])
        .await
        .unwrap();

    for reply in [
        r#"{"missed_questions": [{"question": "family history?", "domain": "FH"}], "completeness_score": 5}"#,
        r#"{"domains": [{"domain": "HPI", "score": 8}], "cumulative_score": 6, "overall_feedback": "Ask about relatives."}"#,
        r#"{"diagnosis_accuracy": 9, "reasoning_quality": 8, "physical_exam_score": 7, "test_ordering_score": 6}"#,
        r#"{"differential_match": 5}"#,
        r#"{"capsules": []}"#,
        r#"{"score": 8, "summary": "Appropriate first-line therapy."}"#,
        r#"{"total_score": 2, "max_score": 2, "questions": [{"question": "Key antibody?", "score": 2, "max_score": 2}]}"#,
    ] {
        h.oracle.push_reply(reply);
    }

    let feedback = &h.pipeline.feedback;
    feedback.analyze_history(&k).await.unwrap();
    feedback.synthesize_history_domains(&k).await.unwrap();
    feedback.evaluate_diagnosis(&k).await.unwrap();
    feedback.evaluate_treatment(&k).await.unwrap();
    feedback
        .score_osce(
            &k,
            &[OsceAnswer {
                question: "Key antibody?".into(),
                answer: "anti-dsDNA".into(),
            }],
        )
        .await
        .unwrap();

    let before = sessions.require(&k).await.unwrap();
    let record = h.pipeline.finalize(&k, "Rheumatology").await.unwrap();
    let after = sessions.require(&k).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(h.archive.len(), 1);
    assert_eq!(record.rubric.history_taking, 6.0);
    assert_eq!(record.rubric.physical_exam, 7.0);
    assert_eq!(record.rubric.differential_match, 5.0);
    assert_eq!(
        record.final_diagnosis.unwrap().final_diagnosis,
        "Systemic lupus erythematosus"
    );
    assert_eq!(record.osce_summary["total_score"], 2.0);
    assert!(record.feedback_summary.contains("Appropriate first-line therapy."));
    assert_eq!(h.oracle.remaining_replies(), 0);

    assert!(after.feedback(FeedbackStage::Treatment).is_some());
    assert_eq!(after.interactions.history_taking.len(), 1);
}

#[tokio::test]
async fn finalize_without_session_is_not_found() {
    let h = harness();
    let err = h.pipeline.finalize(&key(), "Rheumatology").await.unwrap_err();
    assert!(matches!(err, CaseFlowError::SessionNotFound(_)));
    assert!(h.archive.is_empty());
}
