use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use codeguard::analyzer::RepoAnalyzer;
use codeguard::config::Config;
use codeguard::server::{self, AppState};
use codeguard::store::MemoryStore;
use codeguard::testrun::ProjectType;

#[derive(Parser)]
#[command(name = "codeguard")]
#[command(version, about = "Automated code-compliance service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook + healing server (default)
    Serve {
        /// Port to listen on; falls back to $PORT, then 8080
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Analyze a local checkout and print findings as JSON
    Scan {
        /// Path to the repository root
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let mut config = Config::from_env();
            if let Some(port) = port {
                config.port = port;
            }
            let state = AppState::new(config, Arc::new(MemoryStore::new()));
            server::run(state).await
        }
        Commands::Scan { path } => {
            let project_type = ProjectType::detect(&path);
            let issues = RepoAnalyzer::new().analyze(&path);
            let report = serde_json::json!({
                "path": path,
                "project_type": project_type,
                "issue_count": issues.len(),
                "issues": issues,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
