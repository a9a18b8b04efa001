use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use sqlmate::chat;
use sqlmate::config::Settings;
use sqlmate::form::{ConnectionForm, DatabaseKind};
use sqlmate::seed;
use sqlmate::web_server::{self, AppState};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the SQLMate web server.
    Serve {
        #[arg(long, env = "SQLMATE_PORT", default_value_t = 8501, help = "Port for the web server.")]
        port: u16,
    },
    /// Chat with a database from the terminal.
    Chat {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Create the demo SQLite database used by the local option.
    Seed {
        #[arg(long, help = "Where to create the database (defaults to --sqlite-path).")]
        path: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct ConnectionArgs {
    /// Connect to a MySQL server instead of the local SQLite file.
    #[arg(long)]
    mysql: bool,
    #[arg(long, env = "MYSQL_HOST", default_value = "")]
    mysql_host: String,
    #[arg(long, env = "MYSQL_USER", default_value = "")]
    mysql_user: String,
    #[arg(long, env = "MYSQL_PASSWORD", default_value = "", hide_env_values = true)]
    mysql_password: String,
    #[arg(long, env = "MYSQL_DATABASE", default_value = "")]
    mysql_database: String,
    #[arg(long, env = "GROQ_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,
}

impl ConnectionArgs {
    fn to_form(&self) -> ConnectionForm {
        ConnectionForm {
            kind: if self.mysql {
                DatabaseKind::MySql
            } else {
                DatabaseKind::Local
            },
            mysql_host: self.mysql_host.clone(),
            mysql_user: self.mysql_user.clone(),
            mysql_password: self.mysql_password.clone(),
            mysql_database: self.mysql_database.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

// Debug goes through the form so secrets stay masked in the startup log.
impl std::fmt::Debug for ConnectionArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.to_form(), f)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GROQ_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,sqlmate=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    info!("SQLMate starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Serve { port } => {
            let service = cli.settings.chat_service()?;
            let state = AppState::new(service, &cli.settings.model);

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(port, state).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down...");
                    web_server_handle.abort();
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }
            info!("Shutdown complete.");
        }
        Commands::Chat { connection } => {
            let service = cli.settings.chat_service()?;
            chat::run_terminal_chat(service, connection.to_form())
                .await
                .context("Chat session failed")?;
        }
        Commands::Seed { path } => {
            let path = path.unwrap_or_else(|| PathBuf::from(&cli.settings.sqlite_path));
            let inserted = seed::seed_student_db(&path)
                .await
                .with_context(|| format!("Failed to seed {}", path.display()))?;
            println!("Seeded {} with {} rows.", path.display(), inserted);
        }
    }

    Ok(())
}
