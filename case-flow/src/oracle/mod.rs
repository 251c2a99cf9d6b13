//! The evaluation oracle: an opaque, asynchronous judge that takes a
//! structured prompt and answers with raw text that should contain JSON.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CaseFlowError, Result};

#[cfg(feature = "rig")]
pub mod rig_backend;
pub mod scripted;

#[cfg(feature = "rig")]
pub use rig_backend::{OracleConfig, OracleProvider, RigOracle};
pub use scripted::ScriptedOracle;

/// A prompt built deterministically from typed inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OraclePrompt {
    /// Which pipeline stage is asking; used in errors and logs.
    pub stage: String,
    /// Role and output-format instructions.
    pub system: String,
    /// Structured inputs for the judgment.
    pub payload: Value,
}

impl OraclePrompt {
    pub fn new(stage: impl Into<String>, system: impl Into<String>, payload: Value) -> Self {
        Self {
            stage: stage.into(),
            system: system.into(),
            payload,
        }
    }

    /// User-turn text: the payload as pretty JSON.
    pub fn render(&self) -> String {
        let body = serde_json::to_string_pretty(&self.payload)
            .unwrap_or_else(|_| self.payload.to_string());
        format!("Input:\n{body}\n\nRespond with JSON only.")
    }
}

#[async_trait]
pub trait EvaluationOracle: Send + Sync {
    async fn judge(&self, prompt: &OraclePrompt) -> Result<String>;
}

/// Removes a surrounding ``` or ```json fence if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Strict, schema-typed parse of an oracle reply.
pub fn parse_judgment<T: DeserializeOwned>(stage: &str, raw: &str) -> Result<T> {
    serde_json::from_str::<T>(strip_code_fence(raw)).map_err(|e| CaseFlowError::OracleMalformed {
        stage: stage.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Verdict {
        passed: bool,
    }

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```  "), "[1]");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parses_fenced_reply() {
        let v: Verdict = parse_judgment("validation", "```json\n{\"passed\": true}\n```").unwrap();
        assert!(v.passed);
    }

    #[test]
    fn shape_deviation_is_malformed() {
        let err = parse_judgment::<Verdict>("validation", "{\"passed\": \"yes\"}").unwrap_err();
        match err {
            CaseFlowError::OracleMalformed { stage, .. } => assert_eq!(stage, "validation"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(parse_judgment::<Verdict>("validation", "Sure! Here you go").is_err());
    }

    #[test]
    fn render_is_deterministic() {
        let a = OraclePrompt::new("s", "sys", json!({"b": 1, "a": [1, 2]}));
        let b = OraclePrompt::new("s", "sys", json!({"a": [1, 2], "b": 1}));
        assert_eq!(a.render(), b.render());
    }
}
