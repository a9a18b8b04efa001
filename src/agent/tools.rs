//! Database tools the agent can call by name.

use std::sync::Arc;

use crate::database::SqlBackend;
use crate::llm_interaction::{ChatMessage, ChatModel};

use super::prompt::query_checker_prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Query,
    Schema,
    ListTables,
    QueryChecker,
}

pub const ALL_TOOLS: [Tool; 4] = [Tool::Query, Tool::Schema, Tool::ListTables, Tool::QueryChecker];

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::Query => "sql_db_query",
            Tool::Schema => "sql_db_schema",
            Tool::ListTables => "sql_db_list_tables",
            Tool::QueryChecker => "sql_db_query_checker",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Tool::Query => {
                "Input to this tool is a detailed and correct SQL query, output is a result from the database. \
                 If the query is not correct, an error message will be returned. \
                 If an error is returned, rewrite the query, check the query, and try again. \
                 If you encounter an issue with Unknown column 'xxxx' in 'field list', \
                 use sql_db_schema to query the correct table fields."
            }
            Tool::Schema => {
                "Input to this tool is a comma-separated list of tables, output is the schema and sample rows for those tables. \
                 Be sure that the tables actually exist by calling sql_db_list_tables first! \
                 Example Input: table1, table2, table3"
            }
            Tool::ListTables => {
                "Input is an empty string, output is a comma-separated list of tables in the database."
            }
            Tool::QueryChecker => {
                "Use this tool to double check if your query is correct before executing it. \
                 Always use this tool before executing a query with sql_db_query!"
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        ALL_TOOLS.into_iter().find(|tool| tool.name() == name.trim())
    }
}

/// Run `tool` and return the observation text. Failures are returned as
/// `Error: ...` observations so the model can correct itself.
pub async fn invoke(
    tool: Tool,
    input: &str,
    db: &Arc<dyn SqlBackend>,
    model: &Arc<dyn ChatModel>,
) -> String {
    let result = match tool {
        Tool::Query => db.run(input).await.map_err(|e| e.to_string()),
        Tool::Schema => {
            let tables: Vec<String> = input
                .split(',')
                .map(|name| name.trim().trim_matches(|c: char| c == '"' || c == '`' || c == '\''))
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
            db.table_info(&tables).await.map_err(|e| e.to_string())
        }
        Tool::ListTables => db
            .list_tables()
            .await
            .map(|tables| tables.join(", "))
            .map_err(|e| e.to_string()),
        Tool::QueryChecker => {
            let prompt = query_checker_prompt(db.dialect(), input);
            model
                .complete(&[ChatMessage::user(prompt)], &[])
                .await
                .map(|checked| checked.trim().to_string())
                .map_err(|e| e.to_string())
        }
    };
    result.unwrap_or_else(|e| format!("Error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_lookup() {
        assert_eq!(Tool::from_name("sql_db_query"), Some(Tool::Query));
        assert_eq!(Tool::from_name(" sql_db_list_tables "), Some(Tool::ListTables));
        assert_eq!(Tool::from_name("python_repl"), None);
    }
}
