use std::{path::Path, sync::Arc};

use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};
use ceres::{
    adapters::{EndpointOptions, HealthMiddleware, HttpProbeConnector, HttpSchemaFetcher},
    config::{ServerConfig, ServerConfigValidator, loader::load_config},
    core::{LifecycleBus, RemoteSchemaResolver, ResolverConfig, ResolverError, Server},
    ports::{Connector, Middleware, SchemaFetcher},
    schema::{ErrorLogging, LocalSchema, RequestTiming, SchemaSource},
    tracing_setup::{self, LogFormat},
    utils::GracefulShutdown,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Log output format: json or pretty
    #[clap(long, global = true, default_value = "json")]
    log_format: LogFormat,

    /// Log filter directive (e.g. "info" or "ceres=debug"); overrides RUST_LOG
    #[clap(long, global = true)]
    log_level: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

/// Root fields this gateway serves itself.
struct ServiceQuery;

#[Object(name = "Query")]
impl ServiceQuery {
    /// Version of the running gateway
    async fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let logging = (args.log_format, args.log_level.as_deref());
    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config, logging).await,
        None => serve(&args.config, logging).await,
    }
}

async fn serve(config_path: &str, (log_format, log_level): (LogFormat, Option<&str>)) -> Result<()> {
    tracing_setup::init_tracing(log_format, log_level)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Loading configuration from {config_path}");
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    ServerConfigValidator::validate(&config).context("Invalid configuration")?;

    let endpoint = EndpointOptions::from_env().context("Invalid operational environment")?;
    let retry = config.retry.policy()?;
    let fetcher: Arc<dyn SchemaFetcher> = Arc::new(HttpSchemaFetcher::new(config.fetch_timeout()?));
    let local: Arc<dyn SchemaSource> = Arc::new(LocalSchema::new(Schema::new(
        ServiceQuery,
        EmptyMutation,
        EmptySubscription,
    )));
    let bus = Arc::new(LifecycleBus::new());
    let (failure_tx, failure_rx) = mpsc::unbounded_channel();

    let mut middleware: Vec<Arc<dyn Middleware>> = Vec::new();
    if config.health.enabled {
        middleware.push(Arc::new(HealthMiddleware::from_config(&config.health)));
    }
    for mount in &config.graphql {
        let mut resolver_config = ResolverConfig::new(&mount.path, mount.remote_schema_urls.iter().cloned())
            .with_retry(retry)
            .with_middleware(Arc::new(ErrorLogging))
            .with_endpoint_options(endpoint.clone())
            .with_failure_sink(failure_tx.clone());
        if endpoint.debug_tracing {
            resolver_config = resolver_config.with_middleware(Arc::new(RequestTiming));
        }
        middleware.push(RemoteSchemaResolver::new(
            resolver_config,
            local.clone(),
            fetcher.clone(),
            bus.clone(),
        ));
    }
    drop(failure_tx);

    let connectors: Vec<Arc<dyn Connector>> = config
        .connectors
        .iter()
        .map(|connector| Arc::new(HttpProbeConnector::from_config(connector)) as Arc<dyn Connector>)
        .collect();

    tokio::spawn(report_unavailable_remotes(failure_rx));

    let server = Server::new(bus, connectors, middleware);
    let local_addr = server
        .start(&config)
        .await
        .context("Failed to start server")?;
    log_endpoints(&config, local_addr);

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler.run_signal_handler().await;
    });

    let reason = graceful_shutdown.wait_for_shutdown_signal().await;
    tracing::info!("Shutting down: {:?}", reason);
    server.stop();
    if graceful_shutdown.drain(server.closed()).await {
        tracing::info!("Graceful shutdown completed");
    }
    Ok(())
}

fn log_endpoints(config: &ServerConfig, local_addr: std::net::SocketAddr) {
    for mount in &config.graphql {
        tracing::info!(
            remotes = mount.remote_schema_urls.len(),
            "GraphQL explorer at http://{local_addr}{}",
            mount.path
        );
    }
    if config.health.enabled {
        tracing::info!("Health endpoint at http://{local_addr}{}", config.health.path);
    }
}

/// Log remotes whose retries gave up. They stay out of the served schema
/// until their next successful update.
async fn report_unavailable_remotes(mut failures: mpsc::UnboundedReceiver<ResolverError>) {
    while let Some(error) = failures.recv().await {
        tracing::error!("Remote schema left out of the served schema: {error}");
    }
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    // First check if file exists and is readable
    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            for mount in &config.graphql {
                println!(
                    "   • GraphQL {}: {} remote schema(s)",
                    mount.path,
                    mount.remote_schema_urls.len()
                );
            }
            println!("   • Connectors: {}", config.connectors.len());
            println!("   • Health Endpoint: {}", config.health.enabled);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure all URLs start with http:// or https://");
            println!("   • Ensure mount paths start with '/' and are unique");
            println!("   • Verify listen address format (e.g., '127.0.0.1:4000')");
            println!("   • Use humantime durations (e.g., '1s', '250ms')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Ceres GraphQL Gateway Configuration

# The address to listen on
listen_addr = "127.0.0.1:4000"
tcp_nodelay = true

# Deadline for each introspection or version lookup ("0s" disables it)
fetch_timeout = "30s"

# Backoff for remote schemas that could not be fetched
[retry]
factor = 2.0
min_timeout = "1s"
retries = 5

[health]
enabled = true
path = "/health"
manifest = "ceres"

# A GraphQL endpoint stitching the local schema with remote services
[[graphql]]
path = "/graphql"
remote_schema_urls = [
    "http://localhost:4001/graphql",
]

# Dependencies probed once before middleware starts
# [[connectors]]
# name = "pricing"
# url = "http://localhost:5000/health"
# timeout_secs = 5
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'ceres serve --config {config_path}' to start the server");
    Ok(())
}
