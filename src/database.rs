//! Database handle used by the SQL agent and the sidebar schema view.
//!
//! Two backends are supported: a local SQLite file (opened read-only unless
//! told otherwise) and a remote MySQL server (sessions set to read-only
//! transactions unless told otherwise). Both go through [`sqlx`] with
//! runtime-checked queries, so no `DATABASE_URL` is needed at compile time.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::types::chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::constants::{MAX_CELL_CHARS, SAMPLE_ROWS};
use crate::form::DatabaseTarget;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("local database file not found: {}", .0.display())]
    LocalFileMissing(PathBuf),
    #[error("table_names {} not found in database", .0.join(", "))]
    UnknownTables(Vec<String>),
    #[error("only read statements are allowed, refused: {0}")]
    ReadOnly(String),
    #[error("only one statement can be run at a time")]
    MultipleStatements,
}

/// Columns of one table, as shown in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
}

/// What the agent and the chat service need from a database.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// SQL dialect name handed to the model ("sqlite" or "mysql").
    fn dialect(&self) -> &'static str;

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError>;

    /// CREATE statements plus a few sample rows for each named table.
    async fn table_info(&self, tables: &[String]) -> Result<String, DatabaseError>;

    /// Execute one statement and render the rows as text.
    async fn run(&self, sql: &str) -> Result<String, DatabaseError>;

    async fn schema(&self) -> Result<Vec<TableSchema>, DatabaseError>;
}

/// Opens database handles for a validated target.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &DatabaseTarget,
    ) -> Result<std::sync::Arc<dyn SqlBackend>, DatabaseError>;
}

/// [`Connector`] backed by real sqlx pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector {
    pub allow_writes: bool,
}

#[async_trait]
impl Connector for SqlxConnector {
    async fn connect(
        &self,
        target: &DatabaseTarget,
    ) -> Result<std::sync::Arc<dyn SqlBackend>, DatabaseError> {
        let db = Database::connect(target, self.allow_writes).await?;
        Ok(std::sync::Arc::new(db))
    }
}

#[derive(Debug, Clone)]
enum Pool {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool,
    allow_writes: bool,
}

impl Database {
    /// Open a pool for `target`. The SQLite file must already exist; it is
    /// opened read-only unless `allow_writes` is set.
    #[instrument(skip_all, fields(target = ?target))]
    pub async fn connect(target: &DatabaseTarget, allow_writes: bool) -> Result<Self, DatabaseError> {
        let pool = match target {
            DatabaseTarget::Sqlite { path } => {
                if !path.exists() {
                    return Err(DatabaseError::LocalFileMissing(path.clone()));
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .read_only(!allow_writes)
                    .create_if_missing(false);
                let pool = SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await?;
                Pool::Sqlite(pool)
            }
            DatabaseTarget::MySql {
                host,
                port,
                user,
                password,
                database,
            } => {
                let options = MySqlConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .username(user)
                    .password(password)
                    .database(database);
                let mut pool_options = MySqlPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(10));
                if !allow_writes {
                    // The server refuses writes on these sessions even if the guard misses one.
                    pool_options = pool_options.after_connect(|conn, _meta| {
                        Box::pin(async move {
                            conn.execute("SET SESSION TRANSACTION READ ONLY").await?;
                            Ok(())
                        })
                    });
                }
                let pool = pool_options.connect_with(options).await?;
                Pool::MySql(pool)
            }
        };
        info!(allow_writes, "Database connection established");
        Ok(Self { pool, allow_writes })
    }

    async fn create_statement(&self, table: &str) -> Result<String, DatabaseError> {
        match &self.pool {
            Pool::Sqlite(pool) => {
                let sql: Option<String> = sqlx::query_scalar(
                    "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                )
                .bind(table)
                .fetch_one(pool)
                .await?;
                Ok(sql.unwrap_or_default())
            }
            Pool::MySql(pool) => {
                let row = sqlx::query(&format!("SHOW CREATE TABLE {}", quote_mysql(table)))
                    .fetch_one(pool)
                    .await?;
                Ok(text_column(&row, 1)?)
            }
        }
    }

    async fn sample_rows(&self, table: &str) -> Result<String, DatabaseError> {
        match &self.pool {
            Pool::Sqlite(pool) => {
                let sql = format!("SELECT * FROM {} LIMIT {}", quote_sqlite(table), SAMPLE_ROWS);
                let rows = sqlx::query(&sql).fetch_all(pool).await?;
                Ok(render_table(&rows, sqlite_cell))
            }
            Pool::MySql(pool) => {
                let sql = format!("SELECT * FROM {} LIMIT {}", quote_mysql(table), SAMPLE_ROWS);
                let rows = sqlx::query(&sql).fetch_all(pool).await?;
                Ok(render_table(&rows, mysql_cell))
            }
        }
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnSchema>, DatabaseError> {
        let pairs: Vec<(String, String)> = match &self.pool {
            Pool::Sqlite(pool) => {
                let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_sqlite(table)))
                    .fetch_all(pool)
                    .await?;
                rows.iter()
                    .map(|row| Ok((row.try_get::<String, _>(1)?, row.try_get::<String, _>(2)?)))
                    .collect::<Result<_, sqlx::Error>>()?
            }
            Pool::MySql(pool) => {
                sqlx::query_as(
                    "SELECT CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR) \
                     FROM INFORMATION_SCHEMA.COLUMNS \
                     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                     ORDER BY ORDINAL_POSITION",
                )
                .bind(table)
                .fetch_all(pool)
                .await?
            }
        };
        Ok(pairs
            .into_iter()
            .map(|(name, data_type)| ColumnSchema { name, data_type })
            .collect())
    }
}

#[async_trait]
impl SqlBackend for Database {
    fn dialect(&self) -> &'static str {
        match self.pool {
            Pool::Sqlite(_) => "sqlite",
            Pool::MySql(_) => "mysql",
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let tables = match &self.pool {
            Pool::Sqlite(pool) => {
                sqlx::query_scalar(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .fetch_all(pool)
                .await?
            }
            Pool::MySql(pool) => {
                sqlx::query_scalar(
                    "SELECT CAST(TABLE_NAME AS CHAR) FROM INFORMATION_SCHEMA.TABLES \
                     WHERE TABLE_SCHEMA = DATABASE() ORDER BY TABLE_NAME",
                )
                .fetch_all(pool)
                .await?
            }
        };
        Ok(tables)
    }

    async fn table_info(&self, tables: &[String]) -> Result<String, DatabaseError> {
        let known = self.list_tables().await?;
        let unknown: Vec<String> = tables
            .iter()
            .filter(|name| !known.contains(name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(DatabaseError::UnknownTables(unknown));
        }

        let mut sections = Vec::with_capacity(tables.len());
        for table in tables {
            let create = self.create_statement(table).await?;
            let sample = self.sample_rows(table).await?;
            sections.push(format!(
                "{}\n\n/*\n{} rows from {} table:\n{}\n*/",
                create.trim(),
                SAMPLE_ROWS,
                table,
                sample
            ));
        }
        Ok(sections.join("\n\n"))
    }

    #[instrument(skip(self), fields(dialect = self.dialect()))]
    async fn run(&self, sql: &str) -> Result<String, DatabaseError> {
        let sql = sql.trim().trim_end_matches(';').trim();
        if !self.allow_writes {
            check_read_only(sql)?;
        }
        debug!("Running agent query");
        let rendered = match &self.pool {
            Pool::Sqlite(pool) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                render_rows(&rows, sqlite_cell)
            }
            Pool::MySql(pool) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                render_rows(&rows, mysql_cell)
            }
        };
        Ok(rendered)
    }

    async fn schema(&self) -> Result<Vec<TableSchema>, DatabaseError> {
        let mut schema = Vec::new();
        for name in self.list_tables().await? {
            let columns = self.columns(&name).await?;
            schema.push(TableSchema { name, columns });
        }
        Ok(schema)
    }
}

/// Refuse anything that is not a single read statement.
///
/// The text is scanned twice, once with SQLite lexing and once with MySQL
/// lexing (backslash escapes, `#` comments, `/*! */` executable comments),
/// and has to pass both.
pub fn check_read_only(sql: &str) -> Result<(), DatabaseError> {
    for mysql in [false, true] {
        let mut tokens = tokenize(sql, mysql);
        while matches!(tokens.last(), Some((0, Token::Semicolon))) {
            tokens.pop();
        }
        if tokens.iter().any(|(_, token)| *token == Token::Semicolon) {
            return Err(DatabaseError::MultipleStatements);
        }
        if !is_read(&tokens, 0) {
            return Err(DatabaseError::ReadOnly(first_line(
                strip_leading_comments(sql).trim(),
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Open,
    Close,
    Comma,
    Semicolon,
    Equals,
    Other,
}

/// Split `sql` into tokens tagged with their parenthesis depth. Quoted text
/// and comments collapse to `Other` or vanish; words are upper-cased.
fn tokenize(sql: &str, mysql: bool) -> Vec<(usize, Token)> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '#' if mysql => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                if mysql && chars.get(i + 2) == Some(&'!') {
                    // MySQL runs the body of /*! ... */, so lex it as code.
                    i += 3;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    continue;
                }
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '\'' | '"' | '`' => {
                i += 1;
                while i < chars.len() {
                    if mysql && c != '`' && chars[i] == '\\' {
                        i += 2;
                        continue;
                    }
                    if chars[i] == c {
                        if chars.get(i + 1) == Some(&c) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
                tokens.push((depth, Token::Other));
            }
            '(' => {
                tokens.push((depth, Token::Open));
                depth += 1;
                i += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                tokens.push((depth, Token::Close));
                i += 1;
            }
            ',' => {
                tokens.push((depth, Token::Comma));
                i += 1;
            }
            ';' => {
                tokens.push((depth, Token::Semicolon));
                i += 1;
            }
            '=' => {
                tokens.push((depth, Token::Equals));
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let begin = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[begin..i].iter().collect();
                tokens.push((depth, Token::Word(word.to_uppercase())));
            }
            c if c.is_whitespace() => i += 1,
            _ => {
                tokens.push((depth, Token::Other));
                i += 1;
            }
        }
    }
    tokens
}

fn is_word(token: &Token, expected: &str) -> bool {
    matches!(token, Token::Word(word) if word == expected)
}

/// Whether the statement starting at the first token of `depth` only reads.
fn is_read(tokens: &[(usize, Token)], depth: usize) -> bool {
    let Some(pos) = tokens.iter().position(|(d, _)| *d == depth) else {
        return false;
    };
    let rest = &tokens[pos + 1..];
    match &tokens[pos].1 {
        Token::Open => {
            let end = rest
                .iter()
                .position(|(d, token)| *d == depth && *token == Token::Close)
                .unwrap_or(rest.len());
            is_read(&rest[..end], depth + 1)
        }
        Token::Word(word) => match word.as_str() {
            "SELECT" => !rest
                .iter()
                .any(|(_, token)| is_word(token, "OUTFILE") || is_word(token, "DUMPFILE")),
            "SHOW" => true,
            "WITH" => main_statement(rest, depth).is_some_and(|at| is_read(&rest[at..], depth)),
            "EXPLAIN" | "DESCRIBE" | "DESC" => explained_is_read(rest, depth),
            "PRAGMA" => !rest
                .iter()
                .any(|(d, token)| *d == depth && *token == Token::Equals),
            _ => false,
        },
        _ => false,
    }
}

/// Index of the statement that follows a `WITH` list: the first word or
/// group right after a closed CTE body, skipping `AS`.
fn main_statement(rest: &[(usize, Token)], depth: usize) -> Option<usize> {
    let mut after_group = false;
    for (at, (d, token)) in rest.iter().enumerate() {
        if *d != depth {
            continue;
        }
        match token {
            Token::Close => after_group = true,
            Token::Word(word) if word == "AS" => after_group = false,
            Token::Word(_) | Token::Open if after_group => return Some(at),
            Token::Word(_) | Token::Open => {}
            _ => after_group = false,
        }
    }
    None
}

const EXPLAINABLE: [&str; 7] = ["SELECT", "WITH", "TABLE", "INSERT", "UPDATE", "DELETE", "REPLACE"];

/// Plain EXPLAIN only plans; EXPLAIN ANALYZE runs the statement.
fn explained_is_read(rest: &[(usize, Token)], depth: usize) -> bool {
    let analyze = rest
        .iter()
        .find(|(d, _)| *d == depth)
        .is_some_and(|(_, token)| is_word(token, "ANALYZE"));
    if !analyze {
        return true;
    }
    rest.iter()
        .position(|(d, token)| {
            *d == depth && EXPLAINABLE.iter().any(|keyword| is_word(token, keyword))
        })
        .is_some_and(|at| is_read(&rest[at..], depth))
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else {
            return rest;
        }
    }
}

fn first_line(sql: &str) -> String {
    sql.lines().next().unwrap_or_default().chars().take(80).collect()
}

fn quote_sqlite(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_mysql(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Read a text column, tolerating servers that flag metadata as binary.
fn text_column(row: &MySqlRow, idx: usize) -> Result<String, sqlx::Error> {
    match row.try_get::<String, _>(idx) {
        Ok(text) => Ok(text),
        Err(_) => {
            let bytes: Vec<u8> = row.try_get(idx)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

/// Rows as a list of tuples, e.g. `[('Krish', 90), ('John', 100)]`.
fn render_rows<R: Row>(rows: &[R], cell: fn(&R, usize) -> String) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = (0..row.len()).map(|idx| cell(row, idx)).collect();
            format!("({})", cells.join(", "))
        })
        .collect();
    format!("[{}]", tuples.join(", "))
}

/// Tab separated header plus rows, used for sample rows in table info.
fn render_table<R: Row>(rows: &[R], cell: fn(&R, usize) -> String) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let header: Vec<&str> = first.columns().iter().map(|col| col.name()).collect();
    let mut lines = vec![header.join("\t")];
    for row in rows {
        let cells: Vec<String> = (0..row.len()).map(|idx| cell(row, idx)).collect();
        lines.push(cells.join("\t"));
    }
    lines.join("\n")
}

fn quoted(text: &str) -> String {
    let truncated: String = if text.chars().count() > MAX_CELL_CHARS {
        let head: String = text.chars().take(MAX_CELL_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    };
    format!("'{}'", truncated.replace('\'', "\\'"))
}

fn sqlite_cell(row: &SqliteRow, idx: usize) -> String {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return "None".to_string(),
        Ok(_) => {}
        Err(e) => return format!("<{}>", e),
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return quoted(&v);
    }
    match row.try_get::<Vec<u8>, _>(idx) {
        Ok(bytes) => format!("<{} bytes>", bytes.len()),
        Err(_) => "<unsupported>".to_string(),
    }
}

fn mysql_cell(row: &MySqlRow, idx: usize) -> String {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return "None".to_string(),
        Ok(raw) => raw.type_info().name().to_string(),
        Err(e) => return format!("<{}>", e),
    };
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<u64, _>(idx) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<f32, _>(idx) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
        return quoted(&v.to_string());
    }
    if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
        return quoted(&v.to_string());
    }
    if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
        return quoted(&v.to_string());
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return quoted(&v);
    }
    // DECIMAL and JSON arrive as text on the wire but have no checked String decoding.
    if matches!(type_name.as_str(), "DECIMAL" | "JSON") {
        if let Ok(v) = row.try_get_unchecked::<String, _>(idx) {
            return if type_name == "DECIMAL" { v } else { quoted(&v) };
        }
    }
    match row.try_get::<Vec<u8>, _>(idx) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => quoted(&text),
            Err(e) => format!("<{} bytes>", e.as_bytes().len()),
        },
        Err(_) => format!("<unsupported {}>", type_name),
    }
}
