//! biograph: keeps the paper snapshot, knowledge graph and vector store in step.
//! Entry point for the operator binary.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use biograph_db::Database;
use biograph_ingestion::{GeneSource, HttpEmbedder, PubMedSource};
use biograph_orchestration::{
    ApiCallers, Orchestrator, RunStatus, RunStore, Services, WorkflowKind, WorkflowParams,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::{Config, Source};

#[derive(Parser)]
#[command(
    name = "biograph",
    about = "Rate-limited ingestion workflows for the literature graph and vector store",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow to completion and print its report
    Run {
        /// incremental, full-rebuild or consistency-check
        workflow: String,

        /// Search term (repeatable; default: the configured terms)
        #[arg(long = "term", short = 't')]
        terms: Vec<String>,

        /// Cap on papers collected per search term
        #[arg(long)]
        max_results: Option<usize>,

        /// Records per store write
        #[arg(long)]
        batch_size: Option<usize>,

        /// Print the run as JSON instead of the markdown report
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Show a finished run
    Status {
        run_id: Uuid,

        #[arg(long, short = 'j')]
        json: bool,
    },

    /// List workflows and their task graphs
    Workflows,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("biograph=debug,info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Workflows => {
            print_workflows();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { run_id, json } => {
            let config = load_config()?;
            let store = RunStore::new(config.storage.runs_dir());
            let Some(run) = store.load(run_id).await.context("reading run")? else {
                bail!("no run {run_id} under {}", store.dir().display());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                println!("{}", run.summary());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { workflow, terms, max_results, batch_size, json } => {
            let config = load_config()?;
            let orchestrator = build_orchestrator(&config).await?;
            let params = WorkflowParams { search_terms: terms, max_results_per_term: max_results, batch_size };

            let run = orchestrator.run(&workflow, params).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                println!("{}", run.summary());
            }
            Ok(match run.status {
                RunStatus::Failed | RunStatus::Cancelled => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            })
        }
    }
}

fn load_config() -> anyhow::Result<Config> {
    let (config, source) = Config::load()?;
    match source {
        Source::File(path) => info!(path = %path.display(), "configuration loaded"),
        Source::Defaults(path) => {
            warn!(path = %path.display(), "config file not found, using defaults");
        }
    }
    Ok(config)
}

async fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let data_dir = &config.storage.data_dir;
    let db = Database::open(data_dir)
        .await
        .with_context(|| format!("opening stores under {}", data_dir.display()))?;
    info!(data_dir = %data_dir.display(), "stores opened");

    let callers = ApiCallers::new(&config.rate_limits).context("invalid [rate_limits]")?;
    let papers = PubMedSource::new(config.pubmed.clone()).context("building PubMed client")?;
    let genes = GeneSource::new(config.genes.clone()).context("building NCBI Gene client")?;
    let embedder = HttpEmbedder::new(config.embedding.clone()).context("building embedding client")?;
    let services = Services::new(Arc::new(papers), Arc::new(genes), Arc::new(embedder), &db, &callers);

    Ok(Orchestrator::new(config.orchestrator.clone(), services, callers)
        .with_config_checks(config.checks())
        .with_run_store(RunStore::new(config.storage.runs_dir())))
}

fn print_workflows() {
    for kind in WorkflowKind::ALL {
        println!("{kind}: {}", kind.description());
        match biograph_orchestration::WorkflowDefinition::build(kind) {
            Ok(definition) => {
                for line in definition.graph.render().lines() {
                    println!("    {line}");
                }
            }
            Err(e) => println!("    invalid: {e}"),
        }
        println!();
    }
}
