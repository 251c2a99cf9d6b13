use anyhow::{Context, Result, bail};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    File,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Configuration for the case simulation service, read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub session_backend: SessionBackend,
    pub session_dir: PathBuf,
    pub cases_dir: PathBuf,
    pub recorder_max_retries: u32,
    pub default_department: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(raw) => raw.parse::<u16>().context("PORT must be a port number")?,
            None => 3000,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let session_backend = match lookup("SESSION_STORE").as_deref() {
            Some("memory") => SessionBackend::Memory,
            Some("file") => SessionBackend::File,
            Some("postgres") => SessionBackend::Postgres,
            Some(other) => bail!("unknown SESSION_STORE '{other}' (memory, file, postgres)"),
            None if database_url.is_some() => SessionBackend::Postgres,
            None => SessionBackend::Memory,
        };
        if session_backend == SessionBackend::Postgres && database_url.is_none() {
            bail!("SESSION_STORE=postgres requires DATABASE_URL");
        }

        let recorder_max_retries = match lookup("RECORDER_MAX_RETRIES") {
            Some(raw) => raw
                .parse::<u32>()
                .context("RECORDER_MAX_RETRIES must be a non-negative integer")?,
            None => case_flow::lifecycle::DEFAULT_MAX_RETRIES,
        };

        Ok(Self {
            port,
            log_format,
            database_url,
            session_backend,
            session_dir: lookup("SESSION_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/sessions")),
            cases_dir: lookup("CASES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./cases")),
            recorder_max_retries,
            default_department: lookup("DEFAULT_DEPARTMENT")
                .unwrap_or_else(|| "General Medicine".to_string()),
        })
    }
}
