//! Command-line / environment settings shared by every subcommand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use crate::agent::AgentConfig;
use crate::cache::DatabaseCache;
use crate::chat::ChatService;
use crate::constants::{self, DB_CACHE_TTL};
use crate::database::SqlxConnector;
use crate::llm_interaction::GroqProvider;

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Groq model used by the SQL agent.
    #[arg(long, global = true, env = "GROQ_MODEL", default_value_t = constants::GROQ_MODEL.clone())]
    pub model: String,

    /// Base URL of the OpenAI-compatible Groq API.
    #[arg(long, global = true, env = "GROQ_BASE_URL", default_value_t = constants::GROQ_BASE_URL.clone())]
    pub groq_base_url: String,

    /// SQLite file used for the "local database" option.
    #[arg(long, global = true, env = "SQLMATE_SQLITE_PATH", default_value_t = constants::SQLITE_PATH.clone())]
    pub sqlite_path: String,

    /// Let the agent run statements other than reads.
    #[arg(long, global = true)]
    pub allow_writes: bool,

    /// Timeout for a single model request, in seconds.
    #[arg(long, global = true, default_value_t = 120)]
    pub llm_timeout_secs: u64,

    /// Maximum think/act cycles per question.
    #[arg(long, global = true, default_value_t = constants::AGENT_MAX_ITERATIONS)]
    pub max_iterations: usize,
}

impl Settings {
    pub fn chat_service(&self) -> Result<Arc<ChatService>> {
        let provider = GroqProvider::new(
            &self.groq_base_url,
            &self.model,
            Duration::from_secs(self.llm_timeout_secs),
        )
        .context("Failed to build the Groq HTTP client")?;
        let connector = SqlxConnector {
            allow_writes: self.allow_writes,
        };
        Ok(Arc::new(ChatService::new(
            DatabaseCache::new(Arc::new(connector), DB_CACHE_TTL),
            Arc::new(provider),
            AgentConfig {
                max_iterations: self.max_iterations,
                ..AgentConfig::default()
            },
            PathBuf::from(&self.sqlite_path),
        )))
    }
}
