//! Ask DAF - command line entry point
//!
//! `serve` runs the HTTP API; the other commands run one operation against
//! the configured ledger, store and LLM provider and print JSON.

use ask_daf::api::{self, AppState};
use ask_daf::assistant::{AskDaf, AskRequest};
use ask_daf::config::AssistantConfig;
use ask_daf::finance::InvoiceLedger;
use ask_daf::idp::InvoiceExtractor;
use ask_daf::llm::provider::LlmProvider;
use ask_daf::observability::{
    health::HealthMonitor, init_default_logging, init_logging, metrics::metrics, LogFormat,
};
use ask_daf::rag::{embedder_from_config, store_from_config, DocumentInput, RagPipeline};
use ask_daf::tools::{ToolContext, ToolSystem};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Finance assistant for the DAF
#[derive(Parser)]
#[command(name = "ask-daf")]
#[command(about = "Finance assistant with document retrieval and invoice extraction")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ASK_DAF_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Override the configured listen address
        #[arg(long, value_name = "HOST:PORT")]
        addr: Option<SocketAddr>,
        /// Documents to ingest before serving
        #[arg(long = "ingest", value_name = "FILE")]
        documents: Vec<PathBuf>,
    },
    /// Ask one question
    Ask {
        question: String,
        /// Documents to ingest first
        #[arg(long = "ingest", value_name = "FILE")]
        documents: Vec<PathBuf>,
    },
    /// Ingest documents into the configured store
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Retrieve passages for a query
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Extract invoice fields from a text file
    Extract {
        file: PathBuf,
        /// Skip the LLM and use the regex heuristics only
        #[arg(long)]
        heuristic: bool,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// Everything the commands run against
struct Services {
    config: Arc<AssistantConfig>,
    llm: Arc<dyn LlmProvider>,
    rag: Arc<RagPipeline>,
    assistant: Arc<AskDaf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Pretty, false),
        _ => init_logging(Level::TRACE, LogFormat::Pretty, true),
    }

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve { addr, documents } => run_server(config, addr, &documents).await,
        Commands::Ask {
            question,
            documents,
        } => ask(config, question, &documents).await,
        Commands::Ingest { files } => ingest(config, &files).await,
        Commands::Search { query, top_k } => search(config, query, top_k).await,
        Commands::Extract { file, heuristic } => extract(config, &file, heuristic).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<&Path>) -> CliResult<AssistantConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AssistantConfig::load_from_file(path)?);
    }

    for candidate in ["ask-daf.toml", "config/ask-daf.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AssistantConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create ask-daf.toml".into())
}

/// Provider factory for creating LLM providers from configuration
struct LlmProviderFactory;

impl LlmProviderFactory {
    fn create_provider(config: &AssistantConfig) -> CliResult<Arc<dyn LlmProvider>> {
        use ask_daf::llm::providers::{
            AnthropicConfig, AnthropicProvider, OpenAiConfig, OpenAiProvider,
        };

        let api_key = config.get_llm_api_key()?;
        match config.llm.provider.as_str() {
            "openai" => {
                let mut openai_config = OpenAiConfig {
                    api_key,
                    ..Default::default()
                };
                if let Some(base_url) = &config.llm.base_url {
                    openai_config.base_url = base_url.clone();
                }
                Ok(Arc::new(OpenAiProvider::new(openai_config)?))
            }
            "anthropic" => {
                let mut anthropic_config = AnthropicConfig {
                    api_key,
                    ..Default::default()
                };
                if let Some(base_url) = &config.llm.base_url {
                    anthropic_config.base_url = base_url.clone();
                }
                Ok(Arc::new(AnthropicProvider::new(anthropic_config)?))
            }
            provider => Err(format!("Unsupported LLM provider: {provider}").into()),
        }
    }
}

fn load_ledger(config: &AssistantConfig) -> CliResult<InvoiceLedger> {
    match &config.finance.ledger_path {
        Some(path) => {
            let ledger = InvoiceLedger::load_from_file(path)?;
            info!(path = %path.display(), invoices = ledger.len(), "Loaded invoice ledger");
            Ok(ledger)
        }
        None => {
            warn!("No finance.ledger_path configured; invoice tools will see an empty ledger");
            Ok(InvoiceLedger::new(Vec::new()))
        }
    }
}

fn build_rag(config: &AssistantConfig) -> CliResult<Arc<RagPipeline>> {
    let embedder = embedder_from_config(config)?;
    let store = store_from_config(config)?;
    Ok(Arc::new(RagPipeline::new(config, embedder, store)))
}

/// Bootstrap: wire ledger, retrieval, tools and the LLM into the assistant
async fn build_services(config: AssistantConfig) -> CliResult<Services> {
    let config = Arc::new(config);
    let llm = LlmProviderFactory::create_provider(&config)?;
    let rag = build_rag(&config)?;
    let ledger = Arc::new(load_ledger(&config)?);

    let mut tools = ToolSystem::new(ToolContext::new(ledger, Some(Arc::clone(&rag))));
    tools.initialize(&config.tools).await?;
    info!(tools = ?tools.list_tools(), "Tool system initialized");

    let assistant = Arc::new(AskDaf::new(
        Arc::clone(&config),
        Arc::clone(&llm),
        Arc::new(tools),
        Some(Arc::clone(&rag)),
    ));

    Ok(Services {
        config,
        llm,
        rag,
        assistant,
    })
}

async fn ingest_files(rag: &RagPipeline, files: &[PathBuf]) -> CliResult<Vec<serde_json::Value>> {
    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let content = tokio::fs::read_to_string(file).await?;
        let title = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        let report = rag
            .ingest(DocumentInput {
                id: None,
                title,
                content,
                source: Some(file.display().to_string()),
                metadata: Default::default(),
            })
            .await?;
        reports.push(serde_json::to_value(&report)?);
    }
    Ok(reports)
}

async fn run_server(
    config: AssistantConfig,
    addr: Option<SocketAddr>,
    documents: &[PathBuf],
) -> CliResult<()> {
    let collector = metrics();
    collector.set_service_state("initializing");

    let services = build_services(config).await?;
    if !documents.is_empty() {
        let reports = ingest_files(&services.rag, documents).await?;
        info!(documents = reports.len(), "Ingested startup documents");
    }

    let addr = match addr {
        Some(addr) => addr,
        None => format!("{}:{}", services.config.server.host, services.config.server.port)
            .parse()?,
    };

    let health = HealthMonitor::new(services.config.assistant.id.clone())
        .with_store(Arc::clone(services.rag.store()))
        .with_llm(Arc::clone(&services.llm));
    let extractor =
        InvoiceExtractor::new(Arc::clone(&services.llm), services.config.llm.model.clone());

    let state = AppState {
        assistant: services.assistant,
        rag: services.rag,
        extractor: Arc::new(extractor),
        health: Arc::new(health),
    };

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        metrics().set_service_state("stopping");
    };

    api::serve(state, addr, shutdown).await;
    Ok(())
}

async fn ask(config: AssistantConfig, question: String, documents: &[PathBuf]) -> CliResult<()> {
    let services = build_services(config).await?;
    ingest_files(&services.rag, documents).await?;

    let response = services.assistant.ask(AskRequest::new(question)).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn ingest(config: AssistantConfig, files: &[PathBuf]) -> CliResult<()> {
    let rag = build_rag(&config)?;
    let reports = ingest_files(&rag, files).await?;
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn search(config: AssistantConfig, query: String, top_k: Option<usize>) -> CliResult<()> {
    let rag = build_rag(&config)?;
    let mut options = rag.default_options().clone();
    if let Some(top_k) = top_k {
        options.top_k = top_k.max(1);
    }
    let hits = rag.search(&query, &options).await?;
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}

async fn extract(config: AssistantConfig, file: &Path, heuristic: bool) -> CliResult<()> {
    let text = tokio::fs::read_to_string(file).await?;
    let extractor = if heuristic {
        InvoiceExtractor::heuristic_only()
    } else {
        let llm = LlmProviderFactory::create_provider(&config)?;
        InvoiceExtractor::new(llm, config.llm.model.clone())
    };
    let invoice = extractor.extract(&text).await?;
    println!("{}", serde_json::to_string_pretty(&invoice)?);
    Ok(())
}

fn handle_config_command(config: &AssistantConfig, show: bool) -> CliResult<()> {
    config.validate()?;
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
