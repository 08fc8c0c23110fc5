mod analyzer;
mod analyzer_clients;
mod config;
mod error;
mod extraction;
mod intake;
mod model;
mod presentation;
mod reconcile;
mod session;
mod web_server;

use crate::analyzer::LocationAnalyzer;
use crate::analyzer_clients::{gemini::GeminiAnalyzer, replay::ReplayAnalyzer};
use crate::config::AppConfig;
use crate::intake::ImageIntake;
use crate::presentation::Language;
use crate::reconcile::Reconciler;
use crate::session::{AnalysisSession, AppStatus};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(version, about = "Guesses the real-world location of a game screenshot")]
struct Cli {
    /// Directory holding default.toml and optional per-mode overrides
    #[arg(long, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web interface (default)
    Serve,
    /// Analyze one image file and print the result as JSON
    Analyze {
        path: PathBuf,
        #[arg(long, value_enum)]
        language: Option<Language>,
    },
}

fn build_analyzer(config: &AppConfig) -> Result<Arc<dyn LocationAnalyzer>> {
    let analyzer: Arc<dyn LocationAnalyzer> = if config.engine == "replay" {
        Arc::new(ReplayAnalyzer::new(config))
    } else {
        Arc::new(GeminiAnalyzer::new(config)?)
    };
    Ok(analyzer)
}

async fn analyze_file(config: AppConfig, path: PathBuf) -> Result<()> {
    let analyzer = build_analyzer(&config)?;
    let image = ImageIntake::new(config.max_upload_bytes).from_path(&path)?;

    let session = AnalysisSession::new(Reconciler::default(), config.language);
    session.select_image(image)?;
    let snapshot = session.analyze(analyzer.as_ref()).await?;

    if snapshot.status == AppStatus::Error {
        bail!("{}", snapshot.error.unwrap_or_default());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "result": snapshot.result,
            "view": snapshot.view,
        }))?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::new(&cli.config)?;

    // Initialize env_logger based on config.log_level
    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting geoguess_assistant with {} engine", config.engine);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let analyzer = build_analyzer(&config)?;
            if let Err(e) = web_server::start_web_server(Arc::new(config), analyzer).await {
                log::error!("Web server error: {}", e);
            }
        }
        Command::Analyze { path, language } => {
            if let Some(language) = language {
                config.language = language;
            }
            analyze_file(config, path).await?;
        }
    }

    info!("geoguess_assistant finished");

    Ok(())
}
