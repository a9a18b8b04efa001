// Defaults for SQLMate, overridable from the environment (or a .env file).

use std::env;
use std::time::Duration;

/// First (and after a reset, only) entry of every chat transcript.
pub const GREETING: &str = "How can I help you?";

/// How long an opened database pool is reused for the same connection details.
pub const DB_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Upper bound on think/act cycles before the agent gives up.
pub const AGENT_MAX_ITERATIONS: usize = 15;

/// Row limit the agent is asked to apply when the user does not name one.
pub const AGENT_TOP_K: usize = 10;

/// Rows shown per table in the schema description handed to the agent.
pub const SAMPLE_ROWS: usize = 3;

/// Longest rendering of a single cell in query results.
pub const MAX_CELL_CHARS: usize = 300;

pub const NOTICE_MISSING_API_KEY: &str = "Please add the Groq API key";
pub const NOTICE_MISSING_DB_FIELDS: &str = "Please provide all MySQL connection details.";
pub const AGENT_STOPPED: &str = "Agent stopped due to iteration limit or time limit.";

lazy_static::lazy_static! {
    pub static ref GROQ_BASE_URL: String = env::var("GROQ_BASE_URL").unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string());
    pub static ref GROQ_MODEL: String = env::var("GROQ_MODEL").unwrap_or_else(|_| "llama-3.1-8b-instant".to_string());
    pub static ref SQLITE_PATH: String = env::var("SQLMATE_SQLITE_PATH").unwrap_or_else(|_| "student.db".to_string());
    pub static ref TEMPLATES_DIR: String = env::var("SQLMATE_TEMPLATES_DIR").unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("SQLMATE_STATIC_DIR").unwrap_or_else(|_| "static".to_string());
}
