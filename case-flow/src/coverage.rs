//! Tracks which expected history questions the student has covered, per
//! clinical domain.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    catalog::{CaseRepository, ExpectedQuestion, normalize},
    error::Result,
    lifecycle::SessionManager,
    oracle::{EvaluationOracle, OraclePrompt, parse_judgment},
    session::{HistoryExchange, SessionKey},
};

const STAGE: &str = "history_coverage";

const HISTORY_COVERAGE_PROMPT: &str = r#"You are a clinical examiner reviewing a student's history taking.

You are given the expected questions that have NOT yet been covered and the questions the student has asked so far (with the patient's answers). An expected question is covered when the student asked it or something clinically equivalent.

Respond with ONLY this JSON, copying each covered question verbatim from the expected list:
{ "covered": ["<expected question>", ...] }
"#;

const EXCHANGE_COVERAGE_PROMPT: &str = r#"You are a clinical examiner reviewing one question a student just asked a virtual patient.

You are given the expected questions that have NOT yet been covered and the student's latest question with the patient's answer. Decide which expected questions are still not covered after this exchange.

Respond with ONLY this JSON, copying each remaining question verbatim from the expected list:
{ "unmatched": ["<expected question>", ...] }
"#;

/// Completion figures for one domain, or overall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageStat {
    pub total: usize,
    pub remaining: usize,
    pub completed: usize,
    pub percent_complete: u32,
}

impl CoverageStat {
    pub fn new(total: usize, remaining: usize) -> Self {
        let remaining = remaining.min(total);
        let completed = total - remaining;
        let percent_complete = if total == 0 {
            0
        } else {
            (100.0 * completed as f64 / total as f64).round() as u32
        };
        Self {
            total,
            remaining,
            completed,
            percent_complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Expected questions still not covered.
    pub unmatched: Vec<ExpectedQuestion>,
    /// Items that moved from uncovered to covered in this call.
    pub newly_covered: Vec<ExpectedQuestion>,
    pub domains: BTreeMap<String, CoverageStat>,
    pub overall: CoverageStat,
}

/// Either reply shape is accepted regardless of which prompt was sent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CoverageReply {
    Covered { covered: Vec<QuestionRef> },
    Unmatched { unmatched: Vec<QuestionRef> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionRef {
    Text(String),
    Item { question: String },
}

impl QuestionRef {
    fn text(&self) -> &str {
        match self {
            QuestionRef::Text(text) => text,
            QuestionRef::Item { question } => question,
        }
    }
}

/// What the student has said so far.
enum StudentInput<'a> {
    History(&'a [HistoryExchange]),
    Exchange { question: &'a str, response: &'a str },
}

impl StudentInput<'_> {
    fn is_empty(&self) -> bool {
        match self {
            StudentInput::History(history) => history.is_empty(),
            StudentInput::Exchange { question, .. } => question.trim().is_empty(),
        }
    }
}

#[derive(Clone)]
pub struct CoverageTracker {
    sessions: SessionManager,
    cases: Arc<dyn CaseRepository>,
    oracle: Arc<dyn EvaluationOracle>,
}

impl CoverageTracker {
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

    /// Coverage over the full history stored in the session.
    pub async fn track_session(
        &self,
        key: &SessionKey,
        uncovered: &[ExpectedQuestion],
    ) -> Result<CoverageReport> {
        let session = self.sessions.require(key).await?;
        self.track_history(&key.case_id, uncovered, &session.interactions.history_taking).await
    }

    /// Coverage over an explicit question/response history.
    pub async fn track_history(
        &self,
        case_id: &str,
        uncovered: &[ExpectedQuestion],
        history: &[HistoryExchange],
    ) -> Result<CoverageReport> {
        self.track(case_id, uncovered, StudentInput::History(history))
            .await
    }

    /// Coverage update for one new question/response pair.
    pub async fn track_exchange(
        &self,
        case_id: &str,
        uncovered: &[ExpectedQuestion],
        question: &str,
        response: &str,
    ) -> Result<CoverageReport> {
        self.track(
            case_id,
            uncovered,
            StudentInput::Exchange { question, response },
        )
        .await
    }

    async fn track(
        &self,
        case_id: &str,
        uncovered: &[ExpectedQuestion],
        input: StudentInput<'_>,
    ) -> Result<CoverageReport> {
        let catalog = self.cases.expected_questions(case_id).await?;
        let uncovered = restrict_to_catalog(&catalog, uncovered);

        if input.is_empty() {
            debug!(case_id, "no student questions yet, skipping oracle");
            let (domains, overall) = coverage_stats(&catalog, &catalog);
            return Ok(CoverageReport {
                unmatched: uncovered,
                newly_covered: Vec::new(),
                domains,
                overall,
            });
        }

        if uncovered.is_empty() {
            let (domains, overall) = coverage_stats(&catalog, &[]);
            return Ok(CoverageReport {
                unmatched: Vec::new(),
                newly_covered: Vec::new(),
                domains,
                overall,
            });
        }

        let prompt = build_prompt(&uncovered, &input);
        let raw = self.oracle.judge(&prompt).await?;
        let reply: CoverageReply = parse_judgment(STAGE, &raw)?;

        let (unmatched, newly_covered) = split_by_reply(&uncovered, &reply);
        let (domains, overall) = coverage_stats(&catalog, &unmatched);

        info!(
            case_id,
            newly_covered = newly_covered.len(),
            remaining = overall.remaining,
            percent_complete = overall.percent_complete,
            "history coverage updated"
        );

        Ok(CoverageReport {
            unmatched,
            newly_covered,
            domains,
            overall,
        })
    }
}

fn build_prompt(uncovered: &[ExpectedQuestion], input: &StudentInput<'_>) -> OraclePrompt {
    match input {
        StudentInput::History(history) => {
            let asked: Vec<_> = history
                .iter()
                .map(|h| json!({"question": h.question, "response": h.response}))
                .collect();
            OraclePrompt::new(
                STAGE,
                HISTORY_COVERAGE_PROMPT,
                json!({"expected_questions": uncovered, "student_history": asked}),
            )
        }
        StudentInput::Exchange { question, response } => OraclePrompt::new(
            STAGE,
            EXCHANGE_COVERAGE_PROMPT,
            json!({
                "expected_questions": uncovered,
                "student_question": question,
                "patient_response": response,
            }),
        ),
    }
}

/// Empty input means "everything is uncovered". Items not in the catalog are
/// dropped so per-domain totals stay consistent; if that drops every item the
/// full catalog is used, so an unrecognised list never reads as complete.
fn restrict_to_catalog(
    catalog: &[ExpectedQuestion],
    uncovered: &[ExpectedQuestion],
) -> Vec<ExpectedQuestion> {
    if uncovered.is_empty() {
        return catalog.to_vec();
    }

    let wanted: HashSet<String> = uncovered.iter().map(|q| normalize(&q.question)).collect();
    let known: HashSet<String> = catalog.iter().map(|q| normalize(&q.question)).collect();
    for q in uncovered {
        if !known.contains(&normalize(&q.question)) {
            warn!(question = %q.question, "uncovered item is not in the case catalog, ignoring");
        }
    }

    let restricted: Vec<ExpectedQuestion> = catalog
        .iter()
        .filter(|q| wanted.contains(&normalize(&q.question)))
        .cloned()
        .collect();
    if restricted.is_empty() {
        warn!(
            supplied = uncovered.len(),
            "no uncovered item is in the case catalog, using the full catalog"
        );
        return catalog.to_vec();
    }
    restricted
}

/// Returns `(unmatched, newly_covered)`; unmatched is always
/// `uncovered − covered`.
fn split_by_reply(
    uncovered: &[ExpectedQuestion],
    reply: &CoverageReply,
) -> (Vec<ExpectedQuestion>, Vec<ExpectedQuestion>) {
    let (named, named_are_covered) = match reply {
        CoverageReply::Covered { covered } => (covered, true),
        CoverageReply::Unmatched { unmatched } => (unmatched, false),
    };
    let named: HashSet<String> = named.iter().map(|r| normalize(r.text())).collect();

    uncovered
        .iter()
        .cloned()
        .partition(|q| named.contains(&normalize(&q.question)) != named_are_covered)
}

/// Per-domain and overall statistics. Totals always come from the full
/// catalog; `unmatched` only drives `remaining`.
pub fn coverage_stats(
    catalog: &[ExpectedQuestion],
    unmatched: &[ExpectedQuestion],
) -> (BTreeMap<String, CoverageStat>, CoverageStat) {
    let mut totals: BTreeMap<String, usize> = BTreeMap::new();
    for q in catalog {
        *totals.entry(q.domain.clone()).or_default() += 1;
    }

    let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
    for q in unmatched {
        *remaining.entry(q.domain.as_str()).or_default() += 1;
    }

    let domains: BTreeMap<String, CoverageStat> = totals
        .iter()
        .map(|(domain, total)| {
            let left = remaining.get(domain.as_str()).copied().unwrap_or(0);
            (domain.clone(), CoverageStat::new(*total, left))
        })
        .collect();

    let overall = CoverageStat::new(
        catalog.len(),
        domains.values().map(|stat| stat.remaining).sum(),
    );
    (domains, overall)
}
