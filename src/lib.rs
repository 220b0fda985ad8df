//! natsd - subject-based publish/subscribe message broker
//!
//! Clients speak a line-based text protocol (CONNECT, PUB, SUB, UNSUB,
//! PING) and the broker fans each published message out to every
//! subscription whose subject pattern matches.

pub mod auth;
pub mod broker;
pub mod codec;
pub mod config;
pub mod metrics;
pub mod protocol;
pub mod subject;

pub use auth::AuthProvider;
pub use broker::{Broker, BrokerConfig};
pub use config::Config;
pub use metrics::{Metrics, MonitorServer};
pub use subject::{ClientId, Sublist, Subscription};
