//! Prometheus metrics for natsd
//!
//! Exposes counters at /metrics and a JSON snapshot at /varz.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use serde::Serialize;

use crate::protocol::{ProtocolError, ServerInfo};

mod server;

pub use server::MonitorServer;

/// All natsd metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    started_at: Instant,
    started_unix: u64,

    // Connection metrics
    pub connections_total: IntCounter,
    pub connections_current: IntGauge,
    pub connections_rejected_total: IntCounter,

    // Message metrics
    pub messages_received: IntCounter,
    pub messages_sent: IntCounter,
    pub bytes_received: IntCounter,
    pub bytes_sent: IntCounter,

    // Subscription metrics
    pub subscriptions_current: IntGauge,

    // Failure metrics
    pub slow_consumers_total: IntCounter,
    pub auth_failures_total: IntCounter,
    pub protocol_errors_total: IntCounterVec,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
}

fn gauge(name: &str, help: &str) -> prometheus::Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections_total = counter(
            "natsd_connections_total",
            "Total number of client connections since startup",
        )?;
        let connections_current = gauge(
            "natsd_connections_current",
            "Current number of connected clients",
        )?;
        let connections_rejected_total = counter(
            "natsd_connections_rejected_total",
            "Connections refused because the connection limit was reached",
        )?;

        let messages_received = counter(
            "natsd_messages_received_total",
            "Total PUB messages received from clients",
        )?;
        let messages_sent = counter(
            "natsd_messages_sent_total",
            "Total MSG frames delivered to subscribers",
        )?;
        let bytes_received = counter(
            "natsd_bytes_received_total",
            "Total payload bytes received from clients",
        )?;
        let bytes_sent = counter(
            "natsd_bytes_sent_total",
            "Total payload bytes delivered to subscribers",
        )?;

        let subscriptions_current = gauge(
            "natsd_subscriptions_current",
            "Current number of active subscriptions",
        )?;

        let slow_consumers_total = counter(
            "natsd_slow_consumers_total",
            "Connections dropped for exceeding the outbound limit",
        )?;
        let auth_failures_total = counter(
            "natsd_auth_failures_total",
            "Connections dropped for missing or invalid credentials",
        )?;
        let protocol_errors_total = IntCounterVec::new(
            Opts::new(
                "natsd_protocol_errors_total",
                "Protocol errors reported to clients by kind",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_current.clone()))?;
        registry.register(Box::new(connections_rejected_total.clone()))?;
        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_sent.clone()))?;
        registry.register(Box::new(bytes_received.clone()))?;
        registry.register(Box::new(bytes_sent.clone()))?;
        registry.register(Box::new(subscriptions_current.clone()))?;
        registry.register(Box::new(slow_consumers_total.clone()))?;
        registry.register(Box::new(auth_failures_total.clone()))?;
        registry.register(Box::new(protocol_errors_total.clone()))?;

        Ok(Metrics {
            registry,
            started_at: Instant::now(),
            started_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            connections_total,
            connections_current,
            connections_rejected_total,
            messages_received,
            messages_sent,
            bytes_received,
            bytes_sent,
            subscriptions_current,
            slow_consumers_total,
            auth_failures_total,
            protocol_errors_total,
        })
    }

    // Helper methods for common operations

    pub fn client_connected(&self) {
        self.connections_total.inc();
        self.connections_current.inc();
    }

    pub fn client_disconnected(&self) {
        self.connections_current.dec();
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected_total.inc();
    }

    pub fn message_received(&self, bytes: usize) {
        self.messages_received.inc();
        self.bytes_received.inc_by(bytes as u64);
    }

    pub fn message_sent(&self, bytes: usize) {
        self.messages_sent.inc();
        self.bytes_sent.inc_by(bytes as u64);
    }

    pub fn subscription_added(&self) {
        self.subscriptions_current.inc();
    }

    pub fn subscriptions_removed(&self, count: usize) {
        self.subscriptions_current.sub(count as i64);
    }

    pub fn slow_consumer(&self) {
        self.slow_consumers_total.inc();
    }

    pub fn protocol_error(&self, err: &ProtocolError) {
        if matches!(err, ProtocolError::AuthFailed | ProtocolError::AuthRequired) {
            self.auth_failures_total.inc();
        }
        self.protocol_errors_total
            .with_label_values(&[err.label()])
            .inc();
    }

    /// Point-in-time server statistics
    pub fn varz(&self, info: &ServerInfo) -> Varz {
        Varz {
            server_id: info.server_id.clone(),
            version: info.version.clone(),
            host: info.host.clone(),
            port: info.port,
            auth_required: info.auth_required,
            max_payload: info.max_payload,
            start: self.started_unix,
            uptime_secs: self.started_at.elapsed().as_secs(),
            connections: self.connections_current.get().max(0) as u64,
            total_connections: self.connections_total.get(),
            subscriptions: self.subscriptions_current.get().max(0) as u64,
            in_msgs: self.messages_received.get(),
            out_msgs: self.messages_sent.get(),
            in_bytes: self.bytes_received.get(),
            out_bytes: self.bytes_sent.get(),
            slow_consumers: self.slow_consumers_total.get(),
        }
    }
}

/// JSON body served at /varz
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Varz {
    pub server_id: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub auth_required: bool,
    pub max_payload: usize,
    /// Unix timestamp of server start
    pub start: u64,
    pub uptime_secs: u64,
    pub connections: u64,
    pub total_connections: u64,
    pub subscriptions: u64,
    pub in_msgs: u64,
    pub out_msgs: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub slow_consumers: u64,
}
