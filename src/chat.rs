// Turn handling shared by the web UI and the terminal chat.
//
// A turn is: validate the form, open (or reuse) the database, build the model
// client, run the agent once and record the exchange in the session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::agent::{AgentAnswer, AgentConfig, AgentStep, SqlAgent};
use crate::cache::DatabaseCache;
use crate::constants::{NOTICE_MISSING_API_KEY, NOTICE_MISSING_DB_FIELDS};
use crate::database::{SqlBackend, TableSchema};
use crate::form::{ConnectionForm, FormError};
use crate::llm_interaction::ModelProvider;
use crate::session::ChatSession;

/// Result of submitting one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input, nothing happened.
    Ignored,
    /// The form is incomplete; the turn stopped before doing any work.
    Notice(String),
    /// Connecting or answering failed.
    Failed(String),
    Answered(AgentAnswer),
}

/// Sidebar content produced when the connection form is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidebarUpdate {
    Notice(String),
    Error(String),
    Schema(Vec<TableSchema>),
}

/// Why a turn stopped before reaching the database.
enum Halt {
    Notice(String),
    Failed(String),
}

impl From<Halt> for SidebarUpdate {
    fn from(halt: Halt) -> Self {
        match halt {
            Halt::Notice(notice) => SidebarUpdate::Notice(notice),
            Halt::Failed(message) => SidebarUpdate::Error(message),
        }
    }
}

impl From<Halt> for TurnOutcome {
    fn from(halt: Halt) -> Self {
        match halt {
            Halt::Notice(notice) => TurnOutcome::Notice(notice),
            Halt::Failed(message) => TurnOutcome::Failed(message),
        }
    }
}

pub struct ChatService {
    databases: DatabaseCache,
    models: Arc<dyn ModelProvider>,
    agent_config: AgentConfig,
    sqlite_path: PathBuf,
}

impl ChatService {
    pub fn new(
        databases: DatabaseCache,
        models: Arc<dyn ModelProvider>,
        agent_config: AgentConfig,
        sqlite_path: PathBuf,
    ) -> Self {
        Self {
            databases,
            models,
            agent_config,
            sqlite_path,
        }
    }

    /// Open the database described by `form`, or say what is missing.
    async fn open(&self, form: &ConnectionForm) -> Result<Arc<dyn SqlBackend>, Halt> {
        let target = match form.target(&self.sqlite_path) {
            Ok(target) => target,
            Err(FormError::MissingFields(missing)) => {
                info!(?missing, "Connection form incomplete");
                return Err(Halt::Notice(NOTICE_MISSING_DB_FIELDS.to_string()));
            }
            Err(e @ FormError::InvalidPort(_)) => return Err(Halt::Failed(e.to_string())),
        };
        self.databases.get_or_connect(&target).await.map_err(|e| {
            error!(error = %e, "Failed to connect to database");
            Halt::Failed(format!("Failed to connect to the database: {}", e))
        })
    }

    /// Apply the connection form: notices for missing details, then the schema
    /// of the connected database.
    #[instrument(skip_all, fields(kind = ?form.kind))]
    pub async fn configure(&self, form: &ConnectionForm) -> Vec<SidebarUpdate> {
        let mut updates = Vec::new();
        if form.api_key().is_none() {
            updates.push(SidebarUpdate::Notice(NOTICE_MISSING_API_KEY.to_string()));
        }
        match self.open(form).await {
            Ok(db) => match db.schema().await {
                Ok(schema) => updates.push(SidebarUpdate::Schema(schema)),
                Err(e) => {
                    warn!(error = %e, "Schema introspection failed");
                    updates.push(SidebarUpdate::Error(format!("Failed to retrieve schema: {}", e)));
                }
            },
            Err(halt) => updates.push(halt.into()),
        }
        updates
    }

    /// Answer one question. Only questions that reach the agent are recorded
    /// in the transcript and query history.
    #[instrument(skip_all, fields(session = %session.id))]
    pub async fn submit(
        &self,
        session: &mut ChatSession,
        form: &ConnectionForm,
        question: &str,
        observer: Option<&mpsc::UnboundedSender<AgentStep>>,
    ) -> TurnOutcome {
        let question = question.trim();
        if question.is_empty() {
            return TurnOutcome::Ignored;
        }
        let Some(api_key) = form.api_key() else {
            return TurnOutcome::Notice(NOTICE_MISSING_API_KEY.to_string());
        };
        let db = match self.open(form).await {
            Ok(db) => db,
            Err(halt) => return halt.into(),
        };

        session.push_user(question);
        session.record_query(question);

        let agent = SqlAgent::new(self.models.build(api_key), db, self.agent_config);
        match agent.run(question, observer).await {
            Ok(answer) => {
                session.push_assistant(answer.output.clone());
                TurnOutcome::Answered(answer)
            }
            Err(e) => {
                error!(error = %e, "Agent failed");
                let message = format!("Sorry, I could not answer that: {}", e);
                session.push_assistant(message.clone());
                TurnOutcome::Failed(message)
            }
        }
    }
}

/// Interactive chat in the terminal against the same service as the web UI.
pub async fn run_terminal_chat(service: Arc<ChatService>, form: ConnectionForm) -> Result<()> {
    info!("Starting terminal chat session...");
    let mut session = ChatSession::new();

    for update in service.configure(&form).await {
        print_sidebar(&update);
    }
    println!("assistant> {}", session.messages()[0].content);
    println!("(commands: /clear, /history, /quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/clear" => {
                session.clear_messages();
                println!("assistant> {}", session.messages()[0].content);
            }
            "/history" => {
                for entry in session.numbered_history() {
                    println!("{}", entry);
                }
            }
            question => {
                let (tx, mut rx) = mpsc::unbounded_channel::<AgentStep>();
                let printer = tokio::spawn(async move {
                    while let Some(step) = rx.recv().await {
                        println!("  [{}] {}", step.tool, step.tool_input);
                    }
                });
                let outcome = service.submit(&mut session, &form, question, Some(&tx)).await;
                drop(tx);
                let _ = printer.await;
                match outcome {
                    TurnOutcome::Ignored => {}
                    TurnOutcome::Notice(notice) => println!("info: {}", notice),
                    TurnOutcome::Failed(message) => println!("error: {}", message),
                    TurnOutcome::Answered(answer) => println!("assistant> {}", answer.output),
                }
            }
        }
    }

    info!("Chat session finished.");
    Ok(())
}

fn print_sidebar(update: &SidebarUpdate) {
    match update {
        SidebarUpdate::Notice(notice) => println!("info: {}", notice),
        SidebarUpdate::Error(message) => println!("error: {}", message),
        SidebarUpdate::Schema(tables) => {
            println!("Database Schema");
            for table in tables {
                println!("  {}", table.name);
                for column in &table.columns {
                    println!("    - {} ({})", column.name, column.data_type);
                }
            }
        }
    }
}
