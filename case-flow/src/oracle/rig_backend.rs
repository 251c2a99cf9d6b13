use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::{openai, openrouter};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

use super::{EvaluationOracle, OraclePrompt};
use crate::error::{CaseFlowError, Result};

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    OpenRouter,
    OpenAi,
}

impl OracleProvider {
    /// Environment variable holding this provider's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            OracleProvider::OpenRouter => "OPENROUTER_API_KEY",
            OracleProvider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for OracleProvider {
    type Err = CaseFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(OracleProvider::OpenRouter),
            "openai" => Ok(OracleProvider::OpenAi),
            other => Err(CaseFlowError::Config(format!(
                "unknown oracle provider '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub provider: OracleProvider,
    pub model: String,
    pub api_key: String,
}

impl OracleConfig {
    /// Reads `ORACLE_PROVIDER`, `ORACLE_MODEL` and the provider's key variable.
    pub fn from_env() -> Result<Self> {
        let provider = match std::env::var("ORACLE_PROVIDER") {
            Ok(value) => value.parse()?,
            Err(_) => OracleProvider::OpenRouter,
        };
        let model = std::env::var("ORACLE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let api_key = std::env::var(provider.api_key_var())
            .map_err(|_| CaseFlowError::Config(format!("{} not set", provider.api_key_var())))?;
        Ok(Self {
            provider,
            model,
            api_key,
        })
    }
}

enum Backend {
    OpenRouter(openrouter::Client),
    OpenAi(openai::Client),
}

/// Oracle backed by a rig-core completion agent.
pub struct RigOracle {
    backend: Backend,
    model: String,
}

impl RigOracle {
    pub fn new(config: &OracleConfig) -> Self {
        let backend = match config.provider {
            OracleProvider::OpenRouter => {
                Backend::OpenRouter(openrouter::Client::new(&config.api_key))
            }
            OracleProvider::OpenAi => Backend::OpenAi(openai::Client::new(&config.api_key)),
        };
        Self {
            backend,
            model: config.model.clone(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(&OracleConfig::from_env()?))
    }
}

#[async_trait]
impl EvaluationOracle for RigOracle {
    async fn judge(&self, prompt: &OraclePrompt) -> Result<String> {
        info!(stage = %prompt.stage, model = %self.model, "calling evaluation oracle");
        let text = prompt.render();

        let reply = match &self.backend {
            Backend::OpenRouter(client) => {
                let agent = client.agent(&self.model).preamble(&prompt.system).build();
                agent.prompt(text.as_str()).await
            }
            Backend::OpenAi(client) => {
                let agent = client.agent(&self.model).preamble(&prompt.system).build();
                agent.prompt(text.as_str()).await
            }
        };

        reply.map_err(|e| CaseFlowError::Oracle(format!("{} failed: {}", prompt.stage, e)))
    }
}
