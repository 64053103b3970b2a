//! Autocert demo server
//!
//! Terminates TLS with certificates provisioned on demand and answers every
//! request with `Hello World`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use autocert::{
    ConfigParams, Configuration, RenewalScheduler, SniAcceptor, TermsOfServiceAcceptor,
};

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
content-type: text/plain\r\n\
content-length: 11\r\n\
connection: close\r\n\
\r\n\
Hello World";

/// Autocert - TLS termination with automatic ACME certificates
#[derive(Parser, Debug)]
#[command(name = "autocert")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short = 'c', long = "config", env = "AUTOCERT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "log-json", env = "AUTOCERT_LOG_JSON", global = true)]
    log_json: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Values that take precedence over the configuration file
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Manager name
    #[arg(long = "name", global = true)]
    name: Option<String>,

    /// Directory for issued certificates (in-memory cache when unset)
    #[arg(long = "cache-dir", global = true)]
    cache_dir: Option<PathBuf>,

    /// Directory for account keys
    #[arg(long = "work-dir", global = true)]
    work_dir: Option<PathBuf>,

    /// Identifier policy; repeat for several
    #[arg(long = "allow-identifier", global = true)]
    allow_identifiers: Vec<String>,

    /// Terms-of-service acceptor (`any` or `regex:<pattern>`); repeat for several
    #[arg(long = "tos", global = true)]
    tos_acceptors: Vec<TermsOfServiceAcceptor>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and exit
    Test,
    /// Run the demo server (default)
    Run {
        /// Address to listen on
        #[arg(short = 'l', long = "listen", env = "AUTOCERT_LISTEN", default_value = "0.0.0.0:4433")]
        listen: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let params = load_params(cli.config.as_deref(), cli.overrides)?;

    match cli.command {
        Some(Commands::Test) => test_config(params),
        _ if cli.test => test_config(params),
        Some(Commands::Run { listen }) => run_server(params, &listen),
        None => run_server(params, "0.0.0.0:4433"),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Read the configuration file, if any, and apply command line overrides
fn load_params(path: Option<&std::path::Path>, overrides: Overrides) -> Result<ConfigParams> {
    let mut params = match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ConfigParams::from_file(path).context("Failed to load configuration file")?
        }
        None => ConfigParams::default(),
    };

    if overrides.name.is_some() {
        params.name = overrides.name;
    }
    if overrides.cache_dir.is_some() {
        params.cache_dir = overrides.cache_dir;
    }
    if overrides.work_dir.is_some() {
        params.work_dir = overrides.work_dir;
    }
    if !overrides.allow_identifiers.is_empty() {
        params.allow_identifiers = Some(overrides.allow_identifiers);
    }
    if !overrides.tos_acceptors.is_empty() {
        params.tos_acceptors = Some(overrides.tos_acceptors);
    }

    Ok(params)
}

/// Validate configuration and exit
fn test_config(params: ConfigParams) -> Result<()> {
    let config = Configuration::from_params(params).context("Failed to read ACME_* environment")?;
    config.validate().context("Configuration validation failed")?;

    info!("Configuration test successful:");
    info!("  - name: {}", config.name());
    info!("  - directory: {}", config.directory_url().unwrap_or_default());
    info!("  - {} identifier policy(ies)", config.allow_identifiers().len());
    info!("  - {} terms-of-service acceptor(s)", config.tos_acceptors().len());
    match config.cache_dir() {
        Some(dir) => info!("  - cache: {}", dir.display()),
        None => warn!("  - cache: in memory, certificates are re-issued on restart"),
    }

    println!("autocert: configuration test is successful");
    Ok(())
}

/// Run the demo server until Ctrl-C
fn run_server(params: ConfigParams, listen: &str) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let acceptor = SniAcceptor::from_params(params).context("Failed to initialize autocert")?;

        let scheduler = RenewalScheduler::new(acceptor.manager().clone());
        tokio::spawn(scheduler.run());

        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("Failed to bind {listen}"))?;
        info!("HTTPS listening on: {}", listen);

        let acceptor = Arc::new(acceptor);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let acceptor = Arc::clone(&acceptor);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(&acceptor, stream).await {
                            debug!(peer = %peer, error = %e, "Connection closed with error");
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    })
}

async fn serve_connection(acceptor: &SniAcceptor, stream: tokio::net::TcpStream) -> Result<()> {
    let mut tls = acceptor.accept(stream).await?;

    let mut request = [0u8; 4096];
    let read = tls.read(&mut request).await?;
    debug!(bytes = read, "Read request");

    tls.write_all(RESPONSE).await?;
    tls.shutdown().await?;
    Ok(())
}
