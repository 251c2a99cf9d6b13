//! Resolves a free-text test order against the case's finite catalog.
//!
//! Matching is best-effort: a malformed reply or a failed oracle call
//! degrades to "no match".
//! Recording is not: every call appends exactly one order to the session,
//! under the canonical catalog name when matched and the raw text otherwise.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    catalog::{CaseRepository, normalize},
    error::{CaseFlowError, Result},
    lifecycle::SessionManager,
    oracle::{EvaluationOracle, OraclePrompt, parse_judgment},
    session::{Session, SessionKey, TestCategory},
};

const STAGE: &str = "test_order_match";

const TEST_MATCH_PROMPT: &str = r#"You are a clinical examiner checking a student's test order against the list of tests available in a virtual patient case.

Decide whether the requested test corresponds to exactly one entry of the catalog. Accept abbreviations, synonyms and minor misspellings. If it matches none, or could mean more than one entry, it is not a match.

Respond with ONLY this JSON:
{
  "match": true or false,
  "matched_test": "<catalog entry copied verbatim, or null>",
  "reason": "<one sentence>"
}
"#;

/// What the oracle decided about one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchJudgment {
    #[serde(rename = "match")]
    pub is_match: bool,
    pub matched_test: Option<String>,
    pub reason: String,
}

impl MatchJudgment {
    fn unmatched(reason: impl Into<String>) -> Self {
        Self {
            is_match: false,
            matched_test: None,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResolution {
    pub category: TestCategory,
    pub requested: String,
    /// Name written to the session.
    pub recorded_name: String,
    pub judgment: MatchJudgment,
    /// False when the case has no catalog for this category.
    pub catalog_available: bool,
    pub session: Session,
}

#[derive(Clone)]
pub struct TestOrderResolver {
    sessions: SessionManager,
    cases: Arc<dyn CaseRepository>,
    oracle: Arc<dyn EvaluationOracle>,
}

impl TestOrderResolver {
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

    pub async fn resolve(
        &self,
        key: &SessionKey,
        category: TestCategory,
        requested: &str,
    ) -> Result<TestResolution> {
        let requested = requested.trim();
        let catalog = self.cases.test_catalog(&key.case_id, category).await?;

        if catalog.is_empty() {
            info!(case_id = %key.case_id, %category, "no catalog, recording raw order");
            let session = self
                .sessions
                .record_test_order(key, category, requested)
                .await?;
            return Ok(TestResolution {
                category,
                requested: requested.to_string(),
                recorded_name: requested.to_string(),
                judgment: MatchJudgment::unmatched(format!("No {category} catalog for this case")),
                catalog_available: false,
                session,
            });
        }

        let judgment = self.match_against(&catalog, category, requested).await?;
        let recorded_name = judgment
            .matched_test
            .clone()
            .unwrap_or_else(|| requested.to_string());

        info!(
            student_id = %key.student_id,
            case_id = %key.case_id,
            %category,
            requested,
            matched = judgment.is_match,
            recorded = %recorded_name,
            "test order resolved"
        );

        let session = self
            .sessions
            .record_test_order(key, category, &recorded_name)
            .await?;

        Ok(TestResolution {
            category,
            requested: requested.to_string(),
            recorded_name,
            judgment,
            catalog_available: true,
            session,
        })
    }

    async fn match_against(
        &self,
        catalog: &[String],
        category: TestCategory,
        requested: &str,
    ) -> Result<MatchJudgment> {
        let prompt = OraclePrompt::new(
            STAGE,
            TEST_MATCH_PROMPT,
            json!({
                "category": category,
                "requested_test": requested,
                "catalog": catalog,
            }),
        );
        let raw = match self.oracle.judge(&prompt).await {
            Ok(raw) => raw,
            Err(CaseFlowError::Oracle(reason)) => {
                warn!(requested, %reason, "oracle unavailable, treating as no match");
                return Ok(MatchJudgment::unmatched(format!("Oracle unavailable: {reason}")));
            }
            Err(e) => return Err(e),
        };

        let judgment = match parse_judgment::<MatchJudgment>(STAGE, &raw) {
            Ok(judgment) => judgment,
            Err(CaseFlowError::OracleMalformed { reason, .. }) => {
                warn!(requested, %reason, "unparseable match reply, treating as no match");
                return Ok(MatchJudgment::unmatched(format!(
                    "Could not parse oracle response: {reason}"
                )));
            }
            Err(e) => return Err(e),
        };

        Ok(canonicalize(judgment, catalog))
    }
}

/// Snaps a positive judgment onto the exact catalog spelling; a match naming
/// something outside the catalog is downgraded to no match.
fn canonicalize(judgment: MatchJudgment, catalog: &[String]) -> MatchJudgment {
    if !judgment.is_match {
        return MatchJudgment {
            matched_test: None,
            ..judgment
        };
    }

    let Some(named) = judgment.matched_test.as_deref() else {
        return MatchJudgment::unmatched("Oracle reported a match without naming a test");
    };

    let wanted = normalize(named);
    match catalog.iter().find(|entry| normalize(entry) == wanted) {
        Some(entry) => MatchJudgment {
            matched_test: Some(entry.clone()),
            ..judgment
        },
        None => MatchJudgment::unmatched(format!(
            "Oracle matched '{named}', which is not in the catalog"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CaseContent, StaticCaseRepository};
    use crate::oracle::ScriptedOracle;
    use crate::storage::InMemorySessionStore;

    fn resolver(oracle: Arc<ScriptedOracle>, lab_tests: &[&str]) -> TestOrderResolver {
        let cases = StaticCaseRepository::new().with_case(CaseContent {
            case_id: "case-1".into(),
            lab_tests: lab_tests.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        TestOrderResolver::new(
            SessionManager::new(Arc::new(InMemorySessionStore::new())),
            Arc::new(cases),
            oracle,
        )
    }

    fn key() -> SessionKey {
        SessionKey::new("student-1", "case-1")
    }

    #[tokio::test]
    async fn empty_catalog_never_reaches_the_oracle() {
        let oracle = Arc::new(ScriptedOracle::new());
        let resolver = resolver(oracle.clone(), &[]);

        let result = resolver
            .resolve(&key(), TestCategory::LabTest, "troponin")
            .await
            .unwrap();

        assert_eq!(oracle.call_count(), 0);
        assert!(!result.catalog_available);
        assert!(!result.judgment.is_match);
        assert_eq!(result.session.interactions.tests_ordered.len(), 1);
        assert_eq!(result.session.interactions.tests_ordered[0].test_name, "troponin");
    }

    #[tokio::test]
    async fn matched_order_uses_catalog_name() {
        let oracle = Arc::new(ScriptedOracle::with_replies([
            r#"{"match": true, "matched_test": "cbc", "reason": "synonym"}"#,
        ]));
        let resolver = resolver(oracle.clone(), &["CBC", "ANA"]);

        let result = resolver
            .resolve(&key(), TestCategory::LabTest, "complete blood count")
            .await
            .unwrap();

        assert_eq!(result.recorded_name, "CBC");
        assert_eq!(result.judgment.matched_test.as_deref(), Some("CBC"));
        assert_eq!(result.session.interactions.tests_ordered[0].test_name, "CBC");

        let prompt = &oracle.prompts()[0];
        assert_eq!(prompt.payload["requested_test"], "complete blood count");
        assert_eq!(prompt.payload["catalog"], json!(["CBC", "ANA"]));
    }

    #[tokio::test]
    async fn malformed_reply_records_raw_text() {
        let oracle = Arc::new(ScriptedOracle::with_replies(["I think it's the CBC!"]));
        let resolver = resolver(oracle, &["CBC"]);

        let result = resolver
            .resolve(&key(), TestCategory::LabTest, "blood panel")
            .await
            .unwrap();

        assert!(!result.judgment.is_match);
        assert!(result.judgment.reason.starts_with("Could not parse oracle response"));
        assert_eq!(result.recorded_name, "blood panel");
        assert_eq!(result.session.interactions.tests_ordered.len(), 1);
    }

    #[tokio::test]
    async fn match_outside_catalog_is_downgraded() {
        let oracle = Arc::new(ScriptedOracle::with_replies([
            r#"{"match": true, "matched_test": "ESR", "reason": "close"}"#,
        ]));
        let resolver = resolver(oracle, &["CBC"]);

        let result = resolver
            .resolve(&key(), TestCategory::LabTest, "sed rate")
            .await
            .unwrap();

        assert!(!result.judgment.is_match);
        assert_eq!(result.recorded_name, "sed rate");
    }

    #[tokio::test]
    async fn oracle_failure_still_records_raw_order() {
        let oracle = Arc::new(ScriptedOracle::new());
        let resolver = resolver(oracle.clone(), &["CBC"]);

        let resolution = resolver
            .resolve(&key(), TestCategory::LabTest, "blood count")
            .await
            .unwrap();
        assert_eq!(oracle.call_count(), 1);
        assert!(!resolution.judgment.is_match);
        assert!(resolution.judgment.reason.starts_with("Oracle unavailable"));
        assert_eq!(resolution.recorded_name, "blood count");

        let orders = &resolution.session.interactions.tests_ordered;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].test_name, "blood count");
    }

    #[test]
    fn canonicalize_ignores_case_and_spacing() {
        let catalog = vec!["Chest X-Ray".to_string()];
        let judgment = MatchJudgment {
            is_match: true,
            matched_test: Some("  chest   x-ray ".into()),
            reason: "same".into(),
        };
        assert_eq!(
            canonicalize(judgment, &catalog).matched_test.as_deref(),
            Some("Chest X-Ray")
        );
    }
}
