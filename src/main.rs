//! natsd - subject-based publish/subscribe broker
//!
//! Usage:
//!   natsd [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -a, --host <HOST>      Interface to listen on (default: 0.0.0.0)
//!   -p, --port <PORT>      Client port (default: 4222)
//!   -m, --http-port <PORT> Monitoring port (HTTP endpoint disabled if unset)
//!       --user <USER>      Require this user in CONNECT
//!       --pass <PASS>      Require this password in CONNECT
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use natsd::auth::AuthProvider;
use natsd::broker::{Broker, BrokerConfig};
use natsd::config::Config;
use natsd::metrics::{Metrics, MonitorServer};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::default(),
        }
    }
}

/// natsd - subject-based publish/subscribe broker
#[derive(Parser, Debug)]
#[command(name = "natsd")]
#[command(author = "natsd Contributors")]
#[command(version)]
#[command(about = "Subject-based publish/subscribe message broker")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(short = 'a', long)]
    host: Option<String>,

    /// Client port
    #[arg(short, long)]
    port: Option<u16>,

    /// HTTP monitoring port
    #[arg(short = 'm', long)]
    http_port: Option<u16>,

    /// Username required for connections
    #[arg(long)]
    user: Option<String>,

    /// Password required for connections
    #[arg(long)]
    pass: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

impl Args {
    /// Apply command line overrides on top of the loaded configuration
    fn apply(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(http_port) = self.http_port {
            config.server.http_port = Some(http_port);
        }
        if self.user.is_some() || self.pass.is_some() {
            config.auth.required = true;
            config.auth.user = self.user.clone().or(config.auth.user.take());
            if let Some(ref pass) = self.pass {
                config.auth.password = Some(pass.clone());
                config.auth.password_hash = None;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus NATSD__ overrides
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // Setup logging - CLI overrides config
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(ref path) = args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let broker_config = BrokerConfig::from_config(&config)?;

    info!("Starting natsd version {}", natsd::protocol::VERSION);
    info!("  Listen address: {}", broker_config.bind_addr);
    info!("  Max payload: {} bytes", broker_config.max_payload);
    info!("  Max outbound: {} bytes", broker_config.max_outbound);
    if broker_config.max_connections > 0 {
        info!("  Max connections: {}", broker_config.max_connections);
    }
    info!(
        "  Pedantic: {}, verbose: {}",
        broker_config.pedantic, broker_config.verbose
    );
    if config.auth.required {
        info!(
            "  Authorization: required (user {:?}, timeout {:?})",
            config.auth.user.as_deref().unwrap_or(""),
            broker_config.auth_timeout
        );
    } else {
        info!("  Authorization: disabled");
    }

    let mut broker = Broker::with_auth(broker_config, AuthProvider::new(&config.auth));

    // Monitoring endpoint only when a port is configured
    if let Some(http_addr) = config.http_addr()? {
        let metrics = Arc::new(Metrics::new()?);
        broker.set_metrics(metrics.clone());
        info!("  Monitoring: http://{}/varz", http_addr);

        let monitor = MonitorServer::new(metrics, broker.server_info(), http_addr);
        tokio::spawn(async move {
            if let Err(e) = monitor.run().await {
                error!("Monitoring server error: {}", e);
            }
        });
    }

    let broker = Arc::new(broker);

    // Graceful shutdown on Ctrl+C
    let signal_broker = broker.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                signal_broker.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    broker.run().await?;
    Ok(())
}
