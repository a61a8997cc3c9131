use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragloop_agent::{Collaborators, RagPipeline, RunOptions, RunReport};
use ragloop_core::config::AppConfig;
use ragloop_core::event::EventBus;
use ragloop_core::traits::WebSearch;
use ragloop_core::types::{normalize_turns, ConversationTurn, GraphEvent};
use ragloop_kb::SqliteKnowledgeBase;

#[derive(Parser)]
#[command(
    name = "ragloop",
    version,
    about = "Self-correcting retrieval-augmented question answering"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ragloop.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the knowledge base and, optionally, the web
    Ask {
        /// The question (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        question: Vec<String>,
        /// Always allow web search
        #[arg(long, conflicts_with = "no_web")]
        web: bool,
        /// Never search the web
        #[arg(long)]
        no_web: bool,
        /// Maximum number of query rewrites
        #[arg(long)]
        max_steps: Option<u32>,
        /// Earlier conversation as a JSON array of {"role", "content"} objects
        #[arg(long)]
        history: Option<PathBuf>,
        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
        /// Print graph progress to stderr
        #[arg(short, long)]
        verbose: bool,
    },
    /// Index a folder of documents into the knowledge base
    Ingest {
        /// Folder to index (defaults to knowledge_base.docs_dir)
        dir: Option<PathBuf>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragloop=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "ragloop", &mut io::stdout());
        return Ok(());
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Ingest { dir } => {
            let dir = dir.unwrap_or_else(|| config.knowledge_base.docs_dir());
            run_ingest(&config, &dir)?;
        }
        Commands::Ask {
            question,
            web,
            no_web,
            max_steps,
            history,
            json,
            verbose,
        } => {
            let need_web = match (web, no_web) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let mut messages = match history {
                Some(path) => load_history(&path)?,
                None => Vec::new(),
            };
            let question = read_question(question);
            if question.is_empty() {
                anyhow::bail!("no question given");
            }
            messages.push(ConversationTurn::user(question));

            let report = run_ask(
                &config,
                messages,
                RunOptions {
                    need_web,
                    max_steps,
                },
                verbose,
            )
            .await?;
            print_report(&report, json)?;
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn run_ingest(config: &AppConfig, dir: &Path) -> anyhow::Result<()> {
    let db_path = config.knowledge_base.db_path();
    let kb = SqliteKnowledgeBase::open(&db_path)?;
    let report = kb.ingest_folder(dir, &config.knowledge_base)?;
    info!(
        dir = %dir.display(),
        documents = report.documents,
        chunks = report.chunks,
        "Ingested documents"
    );
    println!(
        "Indexed {} chunks from {} documents into {} ({} chunks total)",
        report.chunks,
        report.documents,
        db_path.display(),
        kb.count()?
    );
    Ok(())
}

async fn run_ask(
    config: &AppConfig,
    messages: Vec<ConversationTurn>,
    options: RunOptions,
    verbose: bool,
) -> anyhow::Result<RunReport> {
    let model = Arc::new(ragloop_llm::build_chat_model(config)?);
    let kb = Arc::new(SqliteKnowledgeBase::open(&config.knowledge_base.db_path())?);
    if kb.count()? == 0 {
        warn!("Knowledge base is empty; run `ragloop ingest` first");
    }
    let web: Option<Arc<dyn WebSearch>> = match &config.web_search {
        Some(ws) => Some(Arc::from(ragloop_web::create_web_search(ws)?)),
        None => None,
    };

    let collaborators = Collaborators {
        generator: model.clone(),
        classifier: model,
        knowledge_base: kb,
        web,
    };
    let mut pipeline = RagPipeline::new(collaborators, config.pipeline.clone())?;

    if verbose {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                render_event(&event);
            }
        });
        pipeline = pipeline.with_event_bus(bus);
    }

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Cancelling run...");
        cancel_clone.cancel();
    });

    Ok(pipeline.run(messages, options, cancel).await?)
}

fn load_history(path: &Path) -> anyhow::Result<Vec<ConversationTurn>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading history {}", path.display()))?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing history {}", path.display()))?;
    Ok(normalize_turns(&values))
}

fn read_question(words: Vec<String>) -> String {
    let text = words.join(" ");
    if !text.trim().is_empty() || io::stdin().is_terminal() {
        return text.trim().to_string();
    }
    io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn render_event(event: &GraphEvent) {
    match event {
        GraphEvent::RunStarted { run_id } => eprintln!("\x1b[2m[run {run_id}]\x1b[0m"),
        GraphEvent::Superstep { index, nodes } => {
            eprintln!("\x1b[2m[superstep {index}] {}\x1b[0m", nodes.join(", "))
        }
        GraphEvent::NodeStarted { .. } => {}
        GraphEvent::NodeFinished {
            node,
            elapsed_ms,
            degraded,
        } => {
            if *degraded {
                eprintln!("\x1b[33m  {node} degraded ({elapsed_ms}ms)\x1b[0m");
            } else {
                eprintln!("\x1b[2m  {node} ({elapsed_ms}ms)\x1b[0m");
            }
        }
        GraphEvent::RunFinished {
            supersteps,
            step,
            faithful,
            ..
        } => {
            let verdict = match faithful {
                Some(true) => "faithful",
                Some(false) => "unfaithful",
                None => "unchecked",
            };
            eprintln!("\x1b[2m[done: {supersteps} supersteps, {step} rewrites, {verdict}]\x1b[0m");
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}", report.answer());
    if !report.state.evidence.is_empty() {
        println!();
        println!("Sources:");
        for item in &report.state.evidence {
            println!("  - {}", item.normalized_source());
        }
    }
    if let Some(verdict) = &report.state.faithfulness {
        if !verdict.faithful {
            eprintln!();
            eprintln!("[!!] Answer may not be fully supported by the evidence:");
            for issue in &verdict.issues {
                eprintln!("     {issue}");
            }
        }
    }
    Ok(())
}
