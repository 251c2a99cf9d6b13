//! Read-only case content: test catalogs, expected history questions and the
//! opaque clinical context handed to the oracle.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::{
    error::{CaseFlowError, Result},
    session::TestCategory,
};

/// A history question the student is expected to ask, tagged with its
/// clinical domain (HPI, PMH, FH, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpectedQuestion {
    pub question: String,
    pub domain: String,
}

impl ExpectedQuestion {
    pub fn new(question: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            domain: domain.into(),
        }
    }
}

/// Context slices passed to the feedback stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseContext {
    pub history_context: Value,
    pub diagnosis_context: Value,
    pub treatment_context: Value,
}

/// On-disk shape of one case file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseContent {
    pub case_id: String,
    pub physical_exams: Vec<String>,
    pub lab_tests: Vec<String>,
    pub expected_questions: Vec<ExpectedQuestion>,
    #[serde(flatten)]
    pub context: CaseContext,
}

impl CaseContent {
    pub fn catalog(&self, category: TestCategory) -> &[String] {
        match category {
            TestCategory::PhysicalExam => &self.physical_exams,
            TestCategory::LabTest => &self.lab_tests,
        }
    }
}

#[async_trait]
pub trait CaseRepository: Send + Sync {
    async fn load_case(&self, case_id: &str) -> Result<CaseContent>;

    async fn test_catalog(&self, case_id: &str, category: TestCategory) -> Result<Vec<String>> {
        Ok(self.load_case(case_id).await?.catalog(category).to_vec())
    }

    async fn expected_questions(&self, case_id: &str) -> Result<Vec<ExpectedQuestion>> {
        Ok(self.load_case(case_id).await?.expected_questions)
    }

    async fn case_context(&self, case_id: &str) -> Result<CaseContext> {
        Ok(self.load_case(case_id).await?.context)
    }
}

/// Reads `<dir>/<case_id>.json`.
pub struct FileCaseRepository {
    dir: PathBuf,
}

impl FileCaseRepository {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

/// Case- and whitespace-insensitive form used when comparing free text with
/// catalog entries.
pub(crate) fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_safe_case_id(case_id: &str) -> bool {
    !case_id.is_empty()
        && case_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl CaseRepository for FileCaseRepository {
    async fn load_case(&self, case_id: &str) -> Result<CaseContent> {
        if !is_safe_case_id(case_id) {
            return Err(CaseFlowError::CaseNotFound(case_id.to_string()));
        }
        let path = self.dir.join(format!("{case_id}.json"));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CaseFlowError::CaseNotFound(case_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "case content loaded");

        let mut content: CaseContent = serde_json::from_slice(&bytes)?;
        if content.case_id.is_empty() {
            content.case_id = case_id.to_string();
        }
        Ok(content)
    }
}

/// In-memory case content, keyed by case id.
pub struct StaticCaseRepository {
    cases: Arc<DashMap<String, CaseContent>>,
}

impl StaticCaseRepository {
    pub fn new() -> Self {
        Self {
            cases: Arc::new(DashMap::new()),
        }
    }

    pub fn with_case(self, content: CaseContent) -> Self {
        self.insert(content);
        self
    }

    pub fn insert(&self, content: CaseContent) {
        self.cases.insert(content.case_id.clone(), content);
    }
}

impl Default for StaticCaseRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaseRepository for StaticCaseRepository {
    async fn load_case(&self, case_id: &str) -> Result<CaseContent> {
        self.cases
            .get(case_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| CaseFlowError::CaseNotFound(case_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn file_repository_reads_case_json() {
        let dir = tempfile::tempdir().unwrap();
        let case = json!({
            "physical_exams": ["Skin inspection"],
            "lab_tests": ["CBC", "ANA"],
            "expected_questions": [
                {"question": "How long has the fever lasted?", "domain": "HPI"}
            ],
            "diagnosis_context": {"diagnosis": "SLE"}
        });
        std::fs::write(dir.path().join("sle-01.json"), case.to_string()).unwrap();

        let repo = FileCaseRepository::new(dir.path());
        let content = repo.load_case("sle-01").await.unwrap();
        assert_eq!(content.case_id, "sle-01");
        assert_eq!(
            repo.test_catalog("sle-01", TestCategory::LabTest).await.unwrap(),
            vec!["CBC", "ANA"]
        );
        assert_eq!(content.context.diagnosis_context["diagnosis"], "SLE");
        assert!(content.context.treatment_context.is_null());
    }

    #[tokio::test]
    async fn unknown_or_unsafe_case_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileCaseRepository::new(dir.path());
        assert!(matches!(
            repo.load_case("missing").await,
            Err(CaseFlowError::CaseNotFound(_))
        ));
        assert!(matches!(
            repo.load_case("../etc/passwd").await,
            Err(CaseFlowError::CaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn static_repository_serves_inserted_cases() {
        let repo = StaticCaseRepository::new().with_case(CaseContent {
            case_id: "c1".into(),
            physical_exams: vec!["Auscultation".into()],
            ..Default::default()
        });
        assert_eq!(
            repo.test_catalog("c1", TestCategory::PhysicalExam).await.unwrap(),
            vec!["Auscultation"]
        );
        assert!(repo.test_catalog("c1", TestCategory::LabTest).await.unwrap().is_empty());
    }
}
