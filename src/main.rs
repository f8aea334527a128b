//! LogLens - natural-language log analysis assistant
//!
//! A CLI tool that launches MCP tool servers, hands their tools to an
//! Ollama model with tool-calling, and answers questions about logs.
//!
//! Exit codes:
//!   0 - Success, including shutdown on Ctrl-C / SIGTERM
//!   1 - Startup error (config, no providers, no tools, agent creation)

mod agent;
mod cli;
mod config;
mod mcp;
mod models;
mod repl;
mod report;

use agent::{AgentConfig, LogAnalysisAgent, QueryOrchestrator, ToolExecutor};
use anyhow::{Context, Result};
use cli::Args;
use config::Config;
use mcp::{ConnectionManager, StdioConnector};
use models::ProviderSpec;
use report::{format_error_message, format_status_message, StatusKind, TextNormalizer};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("LogLens v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            let detail = format!("{:#}", e);
            error!("Startup failed: {}", detail);
            eprintln!("\n{}", format_status_message(&detail, StatusKind::Error));
            eprintln!("{}", format_error_message(&TextNormalizer::new(), &detail));
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .loglens.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(config::SETTINGS_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", config::SETTINGS_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", config::SETTINGS_FILE))?;

    println!("✅ Created {} with default settings.", config::SETTINGS_FILE);
    println!("   Edit it to customize the model, provider file and timeouts.");
    Ok(())
}

/// Initialize logging based on verbosity settings. `RUST_LOG` takes precedence.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load settings and providers, run the session, always tear providers down.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let servers = Path::new(&config.general.servers);
    info!("Loading providers from: {}", servers.display());
    let specs = config::enabled_providers(config::load_provider_file(servers)?);
    debug!("{} enabled providers", specs.len());

    let connector = Arc::new(StdioConnector::new(Duration::from_secs(
        config.providers.request_timeout_seconds,
    )));
    let mut manager = ConnectionManager::new(connector);

    let result = tokio::select! {
        result = session(&args, &config, &specs, &mut manager) => result,
        _ = shutdown_signal() => {
            warn!("Interrupted, shutting down");
            Ok(0)
        }
    };

    manager.cleanup().await;
    info!("All providers closed");
    result
}

async fn session(
    args: &Args,
    config: &Config,
    specs: &[ProviderSpec],
    manager: &mut ConnectionManager,
) -> Result<i32> {
    let connections = manager.initialize(specs).await?.len();
    if connections == 0 {
        error!("No provider connection could be created");
        eprintln!(
            "{}",
            format_status_message("No usable providers; check the provider file", StatusKind::Error)
        );
        return Ok(1);
    }

    if args.health {
        println!("{}", repl::health_report(manager).await);
        return Ok(0);
    }

    let tools = manager.get_all_tools().await;
    if tools.is_empty() {
        error!("No tools available from {} providers", connections);
        eprintln!(
            "{}",
            format_status_message("No tools could be loaded from the providers", StatusKind::Error)
        );
        return Ok(1);
    }
    info!(
        "Loaded {} tools from {} active providers",
        tools.len(),
        manager.active_count()
    );

    let agent = match LogAnalysisAgent::new(AgentConfig::from(&config.model), ToolExecutor::new(tools)) {
        Ok(agent) => agent,
        Err(e) => {
            error!("Failed to create agent: {:#}", e);
            eprintln!(
                "{}",
                format_status_message(&format!("Failed to create agent: {:#}", e), StatusKind::Error)
            );
            return Ok(1);
        }
    };
    let mut orchestrator = QueryOrchestrator::new(agent);

    if let Some(ref query) = args.query {
        println!("{}", orchestrator.render(query).await);
        return Ok(0);
    }

    let show_spinner = !args.quiet && std::io::stderr().is_terminal();
    let mut repl = repl::Repl::new(orchestrator, manager).with_spinner(show_spinner);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    repl.run(stdin, &mut stdout).await?;

    Ok(0)
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", config::SETTINGS_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
