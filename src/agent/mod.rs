//! Zero-shot ReAct agent that answers questions against a SQL database.
//!
//! The model is prompted with four database tools. Each iteration it either
//! names a tool (whose output becomes the next observation) or gives a final
//! answer. Steps are reported to an optional observer while the agent works,
//! so the UI can show progress before the answer arrives.

pub mod parser;
pub mod prompt;
pub mod tools;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::constants::{AGENT_MAX_ITERATIONS, AGENT_STOPPED, AGENT_TOP_K};
use crate::database::SqlBackend;
use crate::llm_interaction::{ChatMessage, ChatModel, LlmError};

use parser::Parsed;
use tools::{Tool, ALL_TOOLS};

const STOP_SEQUENCES: [&str; 2] = ["\nObservation:", "\n\tObservation:"];

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// One think/act cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStep {
    pub thought: String,
    pub tool: String,
    pub tool_input: String,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentAnswer {
    pub output: String,
    pub steps: Vec<AgentStep>,
}

#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub top_k: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: AGENT_MAX_ITERATIONS,
            top_k: AGENT_TOP_K,
        }
    }
}

pub struct SqlAgent {
    model: Arc<dyn ChatModel>,
    db: Arc<dyn SqlBackend>,
    config: AgentConfig,
}

impl SqlAgent {
    pub fn new(model: Arc<dyn ChatModel>, db: Arc<dyn SqlBackend>, config: AgentConfig) -> Self {
        Self { model, db, config }
    }

    #[instrument(skip(self, observer), fields(dialect = self.db.dialect()))]
    pub async fn run(
        &self,
        question: &str,
        observer: Option<&mpsc::UnboundedSender<AgentStep>>,
    ) -> Result<AgentAnswer, AgentError> {
        let system = ChatMessage::system(prompt::system_prompt(
            self.db.dialect(),
            self.config.top_k,
            &ALL_TOOLS,
        ));
        let mut scratchpad = String::new();
        let mut steps = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            let messages = [
                system.clone(),
                ChatMessage::user(prompt::user_prompt(question, &scratchpad)),
            ];
            let output = self.model.complete(&messages, &STOP_SEQUENCES).await?;
            debug!(iteration, %output, "Agent model output");

            let step = match parser::parse(&output) {
                Parsed::Finish { answer } => {
                    info!(iterations = iteration, "Agent reached a final answer");
                    return Ok(AgentAnswer {
                        output: answer,
                        steps,
                    });
                }
                Parsed::Action {
                    thought,
                    tool,
                    input,
                } => {
                    let observation = match Tool::from_name(&tool) {
                        Some(known) => tools::invoke(known, &input, &self.db, &self.model).await,
                        None => format!(
                            "{} is not a valid tool, try one of [{}].",
                            tool,
                            ALL_TOOLS.map(Tool::name).join(", ")
                        ),
                    };
                    AgentStep {
                        thought,
                        tool,
                        tool_input: input,
                        observation,
                    }
                }
                Parsed::Invalid(hint) => {
                    warn!(iteration, "Agent output could not be parsed");
                    AgentStep {
                        thought: output.trim().to_string(),
                        tool: "_Exception".to_string(),
                        tool_input: String::new(),
                        observation: hint.to_string(),
                    }
                }
            };

            scratchpad.push_str(output.trim_end());
            scratchpad.push_str("\nObservation: ");
            scratchpad.push_str(&step.observation);
            scratchpad.push_str("\nThought: ");

            if let Some(tx) = observer {
                // The receiver going away only means nobody is watching.
                let _ = tx.send(step.clone());
            }
            steps.push(step);
        }

        warn!(max = self.config.max_iterations, "Agent hit the iteration limit");
        Ok(AgentAnswer {
            output: AGENT_STOPPED.to_string(),
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseError, TableSchema};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned outputs and records every prompt it was given.
    struct ScriptedModel {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, messages: &[ChatMessage], _stop: &[&str]) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| "Thought: still thinking".to_string()))
        }
    }

    struct FakeDb;

    #[async_trait]
    impl SqlBackend for FakeDb {
        fn dialect(&self) -> &'static str {
            "sqlite"
        }
        async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
            Ok(vec!["STUDENT".to_string()])
        }
        async fn table_info(&self, tables: &[String]) -> Result<String, DatabaseError> {
            Ok(format!("CREATE TABLE {}", tables.join(",")))
        }
        async fn run(&self, sql: &str) -> Result<String, DatabaseError> {
            if sql.contains("MARKS") {
                Ok("[(5)]".to_string())
            } else {
                Err(DatabaseError::UnknownTables(vec!["TEACHER".to_string()]))
            }
        }
        async fn schema(&self) -> Result<Vec<TableSchema>, DatabaseError> {
            Ok(Vec::new())
        }
    }

    fn agent(model: Arc<ScriptedModel>, max_iterations: usize) -> SqlAgent {
        SqlAgent::new(
            model,
            Arc::new(FakeDb),
            AgentConfig {
                max_iterations,
                top_k: 10,
            },
        )
    }

    #[tokio::test]
    async fn test_agent_uses_tools_then_answers() {
        let model = ScriptedModel::new(&[
            "Action: sql_db_list_tables\nAction Input: ",
            "Thought: check the count\nAction: sql_db_query\nAction Input: SELECT COUNT(MARKS) FROM STUDENT",
            "Thought: I now know the final answer\nFinal Answer: There are 5 students.",
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let answer = agent(model.clone(), 15)
            .run("How many students are there?", Some(&tx))
            .await
            .unwrap();

        assert_eq!(answer.output, "There are 5 students.");
        assert_eq!(answer.steps.len(), 2);
        assert_eq!(answer.steps[0].observation, "STUDENT");
        assert_eq!(answer.steps[1].tool, "sql_db_query");
        assert_eq!(answer.steps[1].observation, "[(5)]");

        assert_eq!(rx.recv().await.unwrap().tool, "sql_db_list_tables");
        assert_eq!(rx.recv().await.unwrap().tool, "sql_db_query");

        // The last prompt carries both observations in the scratchpad.
        let prompts = model.prompts.lock().unwrap();
        let last = &prompts.last().unwrap()[1].content;
        assert!(last.contains("Observation: STUDENT\nThought: "));
        assert!(last.contains("Observation: [(5)]"));
        assert!(prompts[0][0].content.contains("syntactically correct sqlite query"));
    }

    #[tokio::test]
    async fn test_tool_errors_and_bad_format_become_observations() {
        let model = ScriptedModel::new(&[
            "I think I should query something",
            "Action: sql_db_query\nAction Input: SELECT * FROM TEACHER",
            "Action: python_repl\nAction Input: print(1)",
            "Final Answer: I don't know",
        ]);

        let answer = agent(model, 15).run("Who teaches?", None).await.unwrap();

        assert_eq!(answer.output, "I don't know");
        assert_eq!(answer.steps[0].tool, "_Exception");
        assert_eq!(answer.steps[0].observation, parser::MISSING_ACTION);
        assert_eq!(
            answer.steps[1].observation,
            "Error: table_names TEACHER not found in database"
        );
        assert!(answer.steps[2]
            .observation
            .starts_with("python_repl is not a valid tool"));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let model = ScriptedModel::new(&[]);
        let answer = agent(model.clone(), 3).run("Loop forever", None).await.unwrap();

        assert_eq!(answer.output, AGENT_STOPPED);
        assert_eq!(answer.steps.len(), 3);
        assert_eq!(model.prompts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_query_checker_asks_the_model() {
        let model = ScriptedModel::new(&[
            "Action: sql_db_query_checker\nAction Input: SELECT NAME FROM STUDENT",
            "SELECT NAME FROM STUDENT LIMIT 10",
            "Final Answer: done",
        ]);

        let answer = agent(model.clone(), 15).run("Names?", None).await.unwrap();

        assert_eq!(answer.steps[0].observation, "SELECT NAME FROM STUDENT LIMIT 10");
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1][0].content.contains("Double check the sqlite query above"));
    }
}
