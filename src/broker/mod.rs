//! Broker Core
//!
//! The main broker implementation that accepts client connections, owns the
//! sublist and the client table, and runs the periodic PING broadcast.

mod connection;
mod router;
mod writer;

pub use connection::{Connection, ConnectionError, Shared};
pub use router::{Delivery, Dispatcher};
pub use writer::{SendError, SharedWriter};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::auth::AuthProvider;
use crate::config::{Config, ConfigError};
use crate::metrics::Metrics;
use crate::protocol::{
    ServerInfo, ServerOp, AUTH_TIMEOUT_SECS, DEFAULT_PORT, MAX_CONTROL_LINE_SIZE,
    MAX_OUTBOUND_SIZE, MAX_PAYLOAD_SIZE, PING_INTERVAL_SECS, VERSION,
};
use crate::subject::{ClientId, Sublist};

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// TCP bind address
    pub bind_addr: SocketAddr,
    /// Maximum connections (0 = unlimited)
    pub max_connections: usize,
    /// Maximum control line length
    pub max_control_line: usize,
    /// Maximum PUB payload size
    pub max_payload: usize,
    /// Maximum unflushed outbound bytes per connection
    pub max_outbound: usize,
    /// Time allowed to authorize when auth is required
    pub auth_timeout: Duration,
    /// Interval between PING broadcasts (zero disables)
    pub ping_interval: Duration,
    /// Default strict subject validation for new connections
    pub pedantic: bool,
    /// Default +OK acknowledgements for new connections
    pub verbose: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0,
            max_control_line: MAX_CONTROL_LINE_SIZE,
            max_payload: MAX_PAYLOAD_SIZE,
            max_outbound: MAX_OUTBOUND_SIZE,
            auth_timeout: Duration::from_secs(AUTH_TIMEOUT_SECS),
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
            pedantic: true,
            verbose: true,
        }
    }
}

impl BrokerConfig {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: config.bind_addr()?,
            max_connections: config.limits.max_connections,
            max_control_line: config.limits.max_control_line,
            max_payload: config.limits.max_payload,
            max_outbound: config.limits.max_outbound,
            auth_timeout: config.auth.timeout,
            ping_interval: config.protocol.ping_interval,
            pedantic: config.protocol.pedantic,
            verbose: config.protocol.verbose,
        })
    }
}

/// The Broker
pub struct Broker {
    config: BrokerConfig,
    server_id: String,
    sublist: Arc<Sublist>,
    /// Active connections (client id -> outbound buffer)
    clients: Arc<DashMap<ClientId, Arc<SharedWriter>>>,
    next_client_id: AtomicU64,
    /// Connection tasks alive, including ones still registering
    active: Arc<AtomicUsize>,
    auth: Arc<AuthProvider>,
    shutdown: broadcast::Sender<()>,
    metrics: Option<Arc<Metrics>>,
}

impl Broker {
    /// Create a new broker that accepts every client
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_auth(config, AuthProvider::disabled())
    }

    /// Create a new broker with an authorization check
    pub fn with_auth(config: BrokerConfig, auth: AuthProvider) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        Self {
            config,
            server_id: format!("{:016x}", rand_id()),
            sublist: Arc::new(Sublist::new()),
            clients: Arc::new(DashMap::new()),
            next_client_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
            auth: Arc::new(auth),
            shutdown,
            metrics: None,
        }
    }

    /// Attach metrics collection
    pub fn set_metrics(&mut self, metrics: Arc<Metrics>) {
        self.metrics = Some(metrics);
    }

    /// Banner sent to clients on connect and in reply to INFO
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            server_id: self.server_id.clone(),
            version: VERSION.to_string(),
            host: self.config.bind_addr.ip().to_string(),
            port: self.config.bind_addr.port(),
            auth_required: self.auth.is_required(),
            max_payload: self.config.max_payload,
        }
    }

    /// Run the broker until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the broker on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        let mut shutdown_rx = self.shutdown.subscribe();
        info!("Listening for client connections on {}", listener.local_addr()?);

        let shared = Shared {
            sublist: self.sublist.clone(),
            clients: self.clients.clone(),
            dispatcher: Dispatcher::new(
                self.sublist.clone(),
                self.clients.clone(),
                self.metrics.clone(),
            ),
            auth: self.auth.clone(),
            info: Arc::new(self.server_info()),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        };

        self.spawn_ping_task(shared.dispatcher.clone());

        debug!("Starting TCP accept loop");
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.handle_connection(stream, addr, &shared),
                    Err(e) => error!("Failed to accept TCP connection: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    info!("Broker shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Periodically queue a PING on every connection
    fn spawn_ping_task(&self, dispatcher: Dispatcher) {
        let interval = self.config.ping_interval;
        if interval.is_zero() {
            return;
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    result = shutdown_rx.recv() => {
                        match result {
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            _ => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let sent = dispatcher.broadcast(&ServerOp::Ping);
                        debug!("Sent PING to {} connections", sent);
                    }
                }
            }
        });
    }

    /// Handle a new connection
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, shared: &Shared) {
        let max = self.config.max_connections;
        if max > 0 && self.active.load(Ordering::Acquire) >= max {
            warn!("Connection limit ({}) reached, refusing {}", max, addr);
            if let Some(ref metrics) = self.metrics {
                metrics.connection_rejected();
            }
            drop(stream);
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let shared = shared.clone();
        let active = self.active.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        active.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            let mut conn = Connection::new(stream, addr, id, shared);

            {
                // Pin the connection future so we can poll it repeatedly
                let conn_fut = conn.run();
                tokio::pin!(conn_fut);

                loop {
                    tokio::select! {
                        biased;

                        result = &mut conn_fut => {
                            if let Err(e) = result {
                                debug!("Connection error from {}: {}", addr, e);
                            }
                            break;
                        }
                        result = shutdown_rx.recv() => {
                            match result {
                                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                                _ => {
                                    debug!("Connection {} shutting down", addr);
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            // No-op if run() already cleaned up
            conn.handle_disconnect();
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Shutdown the broker
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Get connection count
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Get subscription count
    pub fn subscription_count(&self) -> usize {
        self.sublist.count()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

/// Generate a random ID
pub(crate) fn rand_id() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_from_config() {
        let config = Config::parse(
            r#"
[server]
host = "127.0.0.1"
port = 4333

[limits]
max_payload = 4096
max_connections = 10

[protocol]
verbose = false
ping_interval = "0s"
"#,
        )
        .unwrap();

        let broker_config = BrokerConfig::from_config(&config).unwrap();
        assert_eq!(broker_config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 4333)));
        assert_eq!(broker_config.max_payload, 4096);
        assert_eq!(broker_config.max_connections, 10);
        assert_eq!(broker_config.max_control_line, MAX_CONTROL_LINE_SIZE);
        assert!(!broker_config.verbose);
        assert!(broker_config.pedantic);
        assert!(broker_config.ping_interval.is_zero());
    }

    #[test]
    fn test_server_info() {
        let config = BrokerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 4444)),
            max_payload: 2048,
            ..Default::default()
        };
        let broker = Broker::new(config);
        let info = broker.server_info();

        assert_eq!(info.host, "127.0.0.1");
        assert_eq!(info.port, 4444);
        assert_eq!(info.max_payload, 2048);
        assert_eq!(info.version, VERSION);
        assert!(!info.auth_required);
        assert_eq!(info.server_id.len(), 16);
        // Stable for the lifetime of the broker
        assert_eq!(broker.server_info(), info);
    }

    #[test]
    fn test_server_info_auth_required() {
        let auth = AuthProvider::new(&crate::config::AuthConfig {
            required: true,
            user: Some("u".into()),
            password: Some("p".into()),
            ..Default::default()
        });
        let broker = Broker::with_auth(BrokerConfig::default(), auth);
        assert!(broker.server_info().auth_required);
        assert_eq!(broker.connection_count(), 0);
        assert_eq!(broker.subscription_count(), 0);
    }
}
