//! Scripted oracle for tests and offline runs.
//!
//! Queue replies with `push_reply()` before the pipeline calls `judge()`.
//! Each call consumes one reply and records the prompt it was given.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{EvaluationOracle, OraclePrompt};
use crate::error::{CaseFlowError, Result};

pub struct ScriptedOracle {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<OraclePrompt>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let oracle = Self::new();
        for reply in replies {
            oracle.push_reply(reply);
        }
        oracle
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply.into());
        }
    }

    /// Number of `judge()` calls made so far.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<OraclePrompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining_replies(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvaluationOracle for ScriptedOracle {
    async fn judge(&self, prompt: &OraclePrompt) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|e| CaseFlowError::Oracle(e.to_string()))?
            .push(prompt.clone());

        self.replies
            .lock()
            .map_err(|e| CaseFlowError::Oracle(e.to_string()))?
            .pop_front()
            .ok_or_else(|| {
                CaseFlowError::Oracle(format!("no scripted reply left for '{}'", prompt.stage))
            })
    }
}
