use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use fogmesh_core::config::{ConfigLoader, Config};
use fogmesh_core::dispatch::DispatchEngine;
use fogmesh_core::hardware::HardwareSpecs;
use fogmesh_core::registry::WorkerRegistry;
use fogmesh_core::rpc::proto::{
    self, AiRequest, ClusterHealthRequest, DeregisterRequest, HeartbeatRequest, RebalanceRequest, RegisterRequest, StatusRequest,
};
use fogmesh_core::rpc::{
    CoordinatorClient, CoordinatorServer, CoordinatorService, GrpcWorkerClient, OllamaInferenceBackend, WorkerServer, WorkerServiceImpl,
};
use fogmesh_core::summarizer::{LocalSummaryBackend, Summarizer};

mod error;

use error::CliError;

/// How many requests a worker advertises it can run concurrently. The
/// out-of-scope worker-side runtime is the real source of this number;
/// this is a placeholder for the stubbed backend.
const DEFAULT_WORKER_CAPACITY: usize = 4;

/// The fogmesh distributed inference load balancer.
#[derive(Parser)]
#[command(name = "fogmesh")]
#[command(author = "fogmesh contributors")]
#[command(version)]
#[command(about = "Fan prompts out to a fleet of inference workers and synthesize their replies", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator's gRPC service.
    Coordinator {
        /// `host:port` to bind the coordinator's gRPC service to.
        #[arg(long)]
        bind: Option<String>,

        /// Path to a config file, overriding the default search path.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Start a worker, advertising a locally-installed-model list.
    Worker {
        /// Address of the coordinator to register with.
        #[arg(long)]
        coordinator: Option<String>,

        /// `host:port` to bind this worker's gRPC service to.
        #[arg(long)]
        bind: Option<String>,

        /// Comma-separated list of installed model identifiers to advertise.
        #[arg(long, value_delimiter = ',')]
        models: Vec<String>,
    },

    /// Submit a one-shot prompt and print the aggregated response.
    Query {
        /// Address of the coordinator to send the request to.
        #[arg(long)]
        coordinator: String,

        /// The prompt text.
        #[arg(long)]
        prompt: String,

        /// Path to an image to attach, repeatable.
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },

    /// Force an immediate recomputation of the fleet's model assignment.
    Rebalance {
        /// Address of the coordinator to send the request to.
        #[arg(long)]
        coordinator: String,
    },

    /// Print the coordinator's cluster status and health.
    Stats {
        /// Address of the coordinator to query.
        #[arg(long)]
        coordinator: String,
    },

    /// Generate shell completions.
    Completions {
        /// The shell to generate completions for.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = match cli.command {
        Commands::Coordinator { bind, config } => run_coordinator(bind, config).await,
        Commands::Worker { coordinator, bind, models } => run_worker(coordinator, bind, models).await,
        Commands::Query { coordinator, prompt, images } => run_query(coordinator, prompt, images).await,
        Commands::Rebalance { coordinator } => run_rebalance(coordinator).await,
        Commands::Stats { coordinator } => run_stats(coordinator).await,
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    if let Err(e) = result {
        e.print_error();
        if cli.verbose {
            if let Some(source) = std::error::Error::source(&e) {
                eprintln!("\nCaused by: {source}");
            }
        }
        process::exit(exit_code_for(&e));
    }
}

fn exit_code_for(e: &CliError) -> i32 {
    use error::exit_codes::*;
    match e {
        CliError::ConfigurationError { .. } => CONFIG_ERROR,
        CliError::InvalidAddress { .. } | CliError::InvalidInput { .. } | CliError::ImageNotFound { .. } => INVALID_INPUT,
        CliError::CoordinatorUnreachable { .. } => UNREACHABLE,
        CliError::RequestFailed { .. } => ERROR,
    }
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config, CliError> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path {
        loader = loader.with_file(&path);
    }
    loader
        .load()
        .map_err(|e| CliError::configuration_error("failed to load configuration", "check ~/.config/fogmesh/config.toml for syntax errors", e))
}

fn parse_bind_addr(address: &str) -> Result<SocketAddr, CliError> {
    address.parse().map_err(|_| CliError::invalid_address(address, "expected host:port, e.g. 0.0.0.0:50051"))
}

async fn run_coordinator(bind: Option<String>, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.coordinator.bind_address = bind;
    }
    let addr = parse_bind_addr(&config.coordinator.bind_address)?;

    let registry = WorkerRegistry::new();
    let worker_client = Arc::new(GrpcWorkerClient::new());
    let dispatch = Arc::new(DispatchEngine::new(registry.clone(), worker_client));
    let summarizer = Arc::new(Summarizer::new(Arc::new(LocalSummaryBackend)));
    let service = CoordinatorService::new(registry.clone(), dispatch, summarizer);

    let heartbeat_timeout = config.coordinator.worker_heartbeat_timeout_seconds;
    let stale_registry = registry.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(heartbeat_timeout.max(1) as u64));
        loop {
            ticker.tick().await;
            let stale = stale_registry.mark_stale_workers(heartbeat_timeout);
            if !stale.is_empty() {
                tracing::warn!(workers = ?stale, "marked workers stale on missed heartbeat");
            }
        }
    });

    println!("{} coordinator listening on {}", "fogmesh".cyan().bold(), addr);
    tracing::info!(%addr, "coordinator starting");

    tonic::transport::Server::builder()
        .add_service(CoordinatorServer::new(service))
        .serve(addr)
        .await
        .map_err(|e| CliError::request_failed("coordinator server exited", "check that the bind address isn't already in use", e.into()))
}

async fn run_worker(coordinator: Option<String>, bind: Option<String>, models: Vec<String>) -> Result<(), CliError> {
    let mut config = load_config(None)?;
    if let Some(coordinator) = coordinator {
        config.worker.coordinator_address = coordinator;
    }
    if let Some(bind) = bind {
        config.worker.bind_address = bind.clone();
    }
    if !models.is_empty() {
        config.worker.installed_models = models;
    }
    if config.worker.installed_models.is_empty() {
        return Err(CliError::invalid_input("no installed models given", "pass --models a,b,c or set worker.installed_models in config"));
    }

    let addr = parse_bind_addr(&config.worker.bind_address)?;
    let hardware = HardwareSpecs::detect();
    let worker_id = format!("{}-{}", hostname(), process::id());

    let backend = Arc::new(OllamaInferenceBackend);
    let service = WorkerServiceImpl::new(backend, DEFAULT_WORKER_CAPACITY);

    let mut coordinator_client = connect_coordinator(&config.worker.coordinator_address).await?;
    let register_response = coordinator_client
        .register_worker(RegisterRequest {
            id: worker_id.clone(),
            address: config.worker.bind_address.clone(),
            hardware: Some(hardware_to_proto(&hardware)),
            installed_models: config.worker.installed_models.clone(),
        })
        .await
        .map_err(|e| CliError::request_failed("registration rejected", "check the coordinator logs for the reason", e.into()))?
        .into_inner();

    println!(
        "{} registered as {} (group {}), assigned {}",
        "fogmesh".cyan().bold(),
        worker_id,
        register_response.client_group,
        if register_response.assigned_model.is_empty() { "no model yet".to_string() } else { register_response.assigned_model }
    );

    let heartbeat_interval = config.worker.heartbeat_interval_seconds;
    let heartbeat_id = worker_id.clone();
    let heartbeat_coordinator = config.worker.coordinator_address.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(heartbeat_interval.max(1)));
        loop {
            ticker.tick().await;
            if let Ok(mut client) = connect_coordinator(&heartbeat_coordinator).await {
                if let Err(e) = client.heartbeat(HeartbeatRequest { id: heartbeat_id.clone() }).await {
                    tracing::warn!(error = %e, "heartbeat failed");
                }
            }
        }
    });

    println!("{} worker listening on {}", "fogmesh".cyan().bold(), addr);
    tracing::info!(%addr, worker_id = %worker_id, "worker starting");

    let shutdown_coordinator = config.worker.coordinator_address.clone();
    let shutdown_id = worker_id.clone();
    let serve_result = tonic::transport::Server::builder().add_service(WorkerServer::new(service)).serve(addr).await;

    if let Ok(mut client) = connect_coordinator(&shutdown_coordinator).await {
        let _ = client.deregister_worker(DeregisterRequest { id: shutdown_id }).await;
    }

    serve_result.map_err(|e| CliError::request_failed("worker server exited", "check that the bind address isn't already in use", e.into()))
}

async fn run_query(coordinator: String, prompt: String, image_paths: Vec<PathBuf>) -> Result<(), CliError> {
    if prompt.trim().is_empty() {
        return Err(CliError::invalid_input("prompt is empty", "pass --prompt with some text"));
    }

    let mut images = Vec::with_capacity(image_paths.len());
    for path in &image_paths {
        let bytes = std::fs::read(path).map_err(|_| CliError::image_not_found(&path.display().to_string()))?;
        images.push(bytes);
    }

    let mut client = connect_coordinator(&coordinator).await?;
    let response = client
        .process_request(AiRequest { request_id: String::new(), prompt, images })
        .await
        .map_err(|e| CliError::request_failed("query failed", "check `fogmesh stats` for cluster health", e.into()))?
        .into_inner();

    println!("{}", response.text);
    println!(
        "\n{} workers={} failed={} summarized={}",
        "---".dimmed(),
        response.worker_ids.join(","),
        response.failed_worker_ids.join(","),
        response.summarized
    );
    Ok(())
}

async fn run_rebalance(coordinator: String) -> Result<(), CliError> {
    let mut client = connect_coordinator(&coordinator).await?;
    let response = client
        .rebalance_assignments(RebalanceRequest {})
        .await
        .map_err(|e| CliError::request_failed("rebalance failed", "", e.into()))?
        .into_inner();
    println!("{} {} workers reassigned", "fogmesh".cyan().bold(), response.workers_reassigned);
    Ok(())
}

async fn run_stats(coordinator: String) -> Result<(), CliError> {
    let mut client = connect_coordinator(&coordinator).await?;

    let status = client
        .get_cluster_status(StatusRequest {})
        .await
        .map_err(|e| CliError::request_failed("status query failed", "", e.into()))?
        .into_inner();
    let health = client
        .health_check(ClusterHealthRequest {})
        .await
        .map_err(|e| CliError::request_failed("health query failed", "", e.into()))?
        .into_inner();

    let health_marker = if health.healthy { "healthy".green() } else { "unhealthy".red() };
    println!("{} {} — {}", "fogmesh cluster:".cyan().bold(), health_marker, health.message);
    println!(
        "workers: {} total, {} active — completed {}, failed {}",
        status.total_workers, status.active_workers, status.total_completed, status.total_failed
    );
    println!("active models: {}", health.active_models.join(", "));
    for worker in &status.workers {
        println!(
            "  {} {} score={:.1} model={} status={}",
            worker.id,
            worker.address,
            worker.score,
            if worker.assigned_model.is_empty() { "-" } else { &worker.assigned_model },
            worker.status
        );
    }
    Ok(())
}

async fn connect_coordinator(address: &str) -> Result<CoordinatorClient<tonic::transport::Channel>, CliError> {
    CoordinatorClient::connect(address.to_string())
        .await
        .map_err(|e| CliError::coordinator_unreachable(address, e.into()))
}

fn hardware_to_proto(h: &HardwareSpecs) -> proto::HardwareSpecs {
    proto::HardwareSpecs {
        cpu_cores: h.cpu_cores as u32,
        cpu_ghz: h.cpu_ghz,
        ram_gb: h.ram_gb,
        gpu_name: h.gpu_name.clone(),
        gpu_memory_gb: h.gpu_memory_gb,
        os_name: h.os_name.clone(),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
