//! Connection details collected from the sidebar form.
//!
//! Nothing in here is persisted; the form lives in session memory only and
//! the password and API key are masked whenever the form is logged.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Which database the user wants to chat with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// The bundled read-only SQLite file.
    #[default]
    Local,
    MySql,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("missing connection details: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("invalid MySQL port in host '{0}'")]
    InvalidPort(String),
}

/// Raw sidebar form state, exactly as typed.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionForm {
    pub kind: DatabaseKind,
    pub mysql_host: String,
    pub mysql_user: String,
    pub mysql_password: String,
    pub mysql_database: String,
    pub api_key: String,
}

/// A validated place to connect to. Used as the connection cache key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum DatabaseTarget {
    Sqlite {
        path: PathBuf,
    },
    MySql {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },
}

impl ConnectionForm {
    /// Labels of the required MySQL fields that are still blank, in form order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        if self.kind == DatabaseKind::Local {
            return Vec::new();
        }
        [
            ("host", &self.mysql_host),
            ("user", &self.mysql_user),
            ("password", &self.mysql_password),
            ("database", &self.mysql_database),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(label, _)| label)
        .collect()
    }

    pub fn api_key(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty()).then_some(key)
    }

    /// Resolve the form into a connection target. `sqlite_path` is the file
    /// used when the local database is selected.
    pub fn target(&self, sqlite_path: &Path) -> Result<DatabaseTarget, FormError> {
        match self.kind {
            DatabaseKind::Local => Ok(DatabaseTarget::Sqlite {
                path: sqlite_path.to_path_buf(),
            }),
            DatabaseKind::MySql => {
                let missing = self.missing_fields();
                if !missing.is_empty() {
                    return Err(FormError::MissingFields(missing));
                }
                let (host, port) = split_host_port(self.mysql_host.trim())?;
                Ok(DatabaseTarget::MySql {
                    host,
                    port,
                    user: self.mysql_user.trim().to_string(),
                    password: self.mysql_password.clone(),
                    database: self.mysql_database.trim().to_string(),
                })
            }
        }
    }
}

/// Accepts `host`, `host:port`, a bare IPv6 address, or `[v6-address]:port`.
fn split_host_port(raw: &str) -> Result<(String, u16), FormError> {
    let parse_port = |port: &str| {
        port.parse::<u16>()
            .map_err(|_| FormError::InvalidPort(raw.to_string()))
    };

    if let Some(bracketed) = raw.strip_prefix('[') {
        return match bracketed.split_once(']') {
            Some((host, "")) => Ok((host.to_string(), DEFAULT_MYSQL_PORT)),
            Some((host, rest)) => match rest.strip_prefix(':') {
                Some(port) => Ok((host.to_string(), parse_port(port)?)),
                None => Err(FormError::InvalidPort(raw.to_string())),
            },
            None => Err(FormError::InvalidPort(raw.to_string())),
        };
    }
    if raw.matches(':').count() > 1 {
        return Ok((raw.to_string(), DEFAULT_MYSQL_PORT));
    }

    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Ok((host.to_string(), parse_port(port)?)),
        _ => Ok((raw.to_string(), DEFAULT_MYSQL_PORT)),
    }
}

fn mask(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "********"
    }
}

impl fmt::Debug for ConnectionForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionForm")
            .field("kind", &self.kind)
            .field("mysql_host", &self.mysql_host)
            .field("mysql_user", &self.mysql_user)
            .field("mysql_password", &mask(&self.mysql_password))
            .field("mysql_database", &self.mysql_database)
            .field("api_key", &mask(&self.api_key))
            .finish()
    }
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseTarget::Sqlite { path } => f.debug_struct("Sqlite").field("path", path).finish(),
            DatabaseTarget::MySql {
                host,
                port,
                user,
                password,
                database,
            } => f
                .debug_struct("MySql")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .field("password", &mask(password))
                .field("database", database)
                .finish(),
        }
    }
}
