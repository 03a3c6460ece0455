//! opgen - operation generator
//!
//! Watches application source for natural-language operation declarations,
//! synthesizes implementations for review and registers the accepted ones.

use anyhow::Result;
use clap::{Parser, Subcommand};
use opgen::error::PipelineError;
use opgen::migrate::{run_migration, MigrationAction, DATABASE_URL_VAR};
use opgen::parser::OperationDetector;
use opgen::pipeline::console::{self, StatePrinter};
use opgen::pipeline::watcher::DEFAULT_DEBOUNCE;
use opgen::pipeline::{Pipeline, SourceWatcher};
use opgen::synthesis::{probe_connection, HttpLlmProvider, LlmProvider, ProviderSelector, Synthesizer};
use opgen::writer::WriteHandler;
use opgen::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "opgen")]
#[command(about = "Generate, review and register data operations from natural-language declarations")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true, env = "OPGEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate migration files from the schema
    Generate,

    /// Check migrations for consistency
    Check,

    /// Apply pending migrations
    Migrate,

    /// Watch the project and synthesize newly declared operations
    Watch,

    /// Send a probe prompt to the selected synthesis backend
    TestLlm {
        /// Backend to use (openai, cerebras); overrides configuration
        #[arg(long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,opgen=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("fatal: {:#}", e);
        if let Some(pipeline_error) = e.downcast_ref::<PipelineError>() {
            for suggestion in pipeline_error.suggestions() {
                eprintln!("  - {}", suggestion);
            }
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate => run_migration_command(MigrationAction::Generate, &config).await,
        Commands::Check => run_migration_command(MigrationAction::Check, &config).await,
        Commands::Migrate => run_migration_command(MigrationAction::Migrate, &config).await,
        Commands::Watch => run_watch(config).await,
        Commands::TestLlm { provider } => run_test_llm(config, provider).await,
    }
}

async fn run_migration_command(action: MigrationAction, config: &Config) -> Result<()> {
    let database_url = std::env::var(DATABASE_URL_VAR).ok();
    let outcome = run_migration(action, config, database_url.as_deref()).await?;
    print!("{}", outcome.output);
    if !outcome.success {
        anyhow::bail!(
            "{} exited with {}",
            outcome.command,
            outcome.exit_code.map_or_else(|| "a signal".to_string(), |c| c.to_string())
        );
    }
    Ok(())
}

async fn run_test_llm(config: Config, provider: Option<String>) -> Result<()> {
    let selector = ProviderSelector::from_env(provider.or_else(|| config.llm.provider.clone()));
    let selection = selector.select()?;
    if let Some(note) = &selection.note {
        println!("Note: {}", note);
    }
    let backend = HttpLlmProvider::from_config(selection.provider, &config.llm, selection.api_key)?;
    println!("Testing {} ({})...", selection.provider, backend.model_name());

    let probe = probe_connection(&backend).await?;
    println!("Message:   {}", probe.message);
    println!("Timestamp: {}", probe.timestamp);
    println!("Connection OK");
    Ok(())
}

async fn run_watch(config: Config) -> Result<()> {
    for warning in config.validate()? {
        tracing::warn!("{}", warning);
    }

    let selection = ProviderSelector::from_env(config.llm.provider.clone()).select()?;
    let backend = HttpLlmProvider::from_config(selection.provider, &config.llm, selection.api_key.clone())?;

    let detector = OperationDetector::new(config.detector_config())?;
    let pipeline = Pipeline::new(
        detector,
        Synthesizer::new(Arc::new(backend)),
        WriteHandler::new(config.writer_config()),
        Some(&selection),
    );
    let _printer = StatePrinter::attach(pipeline.bus());

    let mut watcher = SourceWatcher::new(&config.root, DEFAULT_DEBOUNCE)?;
    watcher.start(pipeline.emitter())?;

    tokio::spawn(console::read_stdin(pipeline.input()));
    let emitter = pipeline.emitter();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            emitter.shutdown();
        }
    });

    println!("{}", console::help_text());
    let result = pipeline.run().await;
    watcher.stop().await;
    Ok(result?)
}
