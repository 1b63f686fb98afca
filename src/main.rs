use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use weft_core::config::AppConfig;
use weft_core::context::ExecutionContext;
use weft_engine::{CompositeHost, ExtensionHost, Workflow, WorkflowEngine};
use weft_gateway::{GatewayServer, RegistryHost, RouteTable, RunnerHost};
use weft_rpc::RunnerPool;
use weft_runner::{FunctionRegistry, RunnerServer};

#[derive(Parser)]
#[command(name = "weft", version, about = "Workflow automation server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and supervised runners
    Serve,
    /// Serve one runner process hosting the native function registry
    Runner {
        /// Runner name from the config's [[runners]] list
        #[arg(long)]
        name: String,
    },
    /// Run a workflow file once and print the report
    Run {
        /// Path to the workflow JSON file
        workflow: PathBuf,
        /// Entry node id
        #[arg(long, default_value = "1")]
        start: String,
        /// Initial context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },
    /// List loaded routes per tenant
    Routes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Serve => serve(&cli.config).await,
        Commands::Runner { name } => runner(&cli.config, &name).await,
        Commands::Run { workflow, start, context } => {
            run_once(&cli.config, &workflow, &start, context.as_deref()).await
        }
        Commands::Routes => list_routes(&cli.config),
    }
}

/// Wire the engine's command hosts: the in-process registry first, then
/// the runner pool.
fn build_engine(config: &AppConfig, pool: Arc<RunnerPool>) -> Arc<WorkflowEngine> {
    let registry = Arc::new(FunctionRegistry::with_builtins());
    let hosts: Vec<Arc<dyn ExtensionHost>> = vec![
        Arc::new(RegistryHost::new(registry)),
        Arc::new(RunnerHost::new(pool)),
    ];
    Arc::new(WorkflowEngine::new(
        Arc::new(CompositeHost::new(hosts)),
        config.engine.clone(),
    ))
}

async fn serve(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let shutdown = CancellationToken::new();

    let pool = Arc::new(RunnerPool::new(
        &config.runners,
        &config.auth.api_key,
        &config.retry,
    ));
    let supervisors = pool.supervise(&shutdown);
    info!(runners = config.runners.len(), supervised = supervisors.len(), "Runner pool ready");

    let engine = build_engine(&config, pool.clone());
    let table = Arc::new(RouteTable::load(Path::new(&config.routes_dir))?);
    let gateway = GatewayServer::new(config.listen.clone(), config.auth.clone(), table, engine);

    let ctrl_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            ctrl_token.cancel();
        }
    });

    gateway.run(shutdown).await?;

    for supervisor in supervisors {
        let _ = supervisor.await;
    }
    pool.close_all().await;
    Ok(())
}

async fn runner(config_path: &Path, name: &str) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let runner = config
        .runners
        .iter()
        .find(|r| r.name == name)
        .ok_or_else(|| anyhow::anyhow!("runner '{}' is not configured", name))?;

    let registry = Arc::new(FunctionRegistry::with_builtins());
    let server = RunnerServer::new(
        runner.name.clone(),
        runner.addr(),
        config.auth.api_key.clone(),
        registry,
    );

    let shutdown = CancellationToken::new();
    let ctrl_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_token.cancel();
        }
    });

    server.run(shutdown).await?;
    Ok(())
}

async fn run_once(
    config_path: &Path,
    workflow_path: &Path,
    start: &str,
    context: Option<&str>,
) -> anyhow::Result<()> {
    // A missing config file is fine here; defaults carry a local run.
    let config = AppConfig::load(config_path).unwrap_or_default();
    let workflow = Workflow::load(workflow_path)?;

    let mut ctx = match context {
        Some(raw) => serde_json::from_str(raw)
            .map(ExecutionContext::from_map)
            .map_err(|e| anyhow::anyhow!("--context must be a JSON object: {}", e))?,
        None => ExecutionContext::new(),
    };

    let pool = Arc::new(RunnerPool::new(
        &config.runners,
        &config.auth.api_key,
        &config.retry,
    ));
    let engine = build_engine(&config, pool.clone());

    let report = engine.run(&workflow, start, &mut ctx).await;
    pool.close_all().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn list_routes(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).unwrap_or_default();
    let table = RouteTable::load(Path::new(&config.routes_dir))?;

    if table.is_empty() {
        println!("No routes loaded from {}", config.routes_dir);
        return Ok(());
    }
    for (tenant, route) in table.routes() {
        println!("{}  {}", tenant, route);
    }
    Ok(())
}
