//! Message Dispatcher
//!
//! Delivers published messages to every matching subscription by writing a
//! MSG frame into the subscriber's SharedWriter. Delivery is synchronous with
//! respect to the publish call; flushing happens on each connection's task.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{trace, warn};

use crate::broker::{SendError, SharedWriter};
use crate::metrics::Metrics;
use crate::protocol::{Message, ServerOp};
use crate::subject::{ClientId, Sublist};

/// Outcome of a single publish
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// MSG frames queued
    pub delivered: usize,
    /// Subscribers closed for exceeding their outbound limit
    pub slow_consumers: usize,
}

/// Routes messages from publishers to subscribers
#[derive(Clone)]
pub struct Dispatcher {
    sublist: Arc<Sublist>,
    /// Client SharedWriters for direct writes
    clients: Arc<DashMap<ClientId, Arc<SharedWriter>>>,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new(
        sublist: Arc<Sublist>,
        clients: Arc<DashMap<ClientId, Arc<SharedWriter>>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            sublist,
            clients,
            metrics,
        }
    }

    /// Deliver `msg` to every matching subscription, once per subscription
    pub fn publish(&self, msg: &Message) -> Delivery {
        let mut delivery = Delivery::default();

        // Collect matches first so the sublist lock is not held while writing
        let matches = self.sublist.matches(&msg.subject);
        for sub in matches.iter() {
            let Some(writer) = self.clients.get(&sub.client_id).map(|w| w.value().clone()) else {
                // Connection is tearing down; its subscriptions go with it
                continue;
            };

            let frame = ServerOp::Msg {
                subject: &msg.subject,
                sid: &sub.sid,
                reply_to: msg.reply_to.as_deref(),
                payload: &msg.payload,
            };
            match writer.send(&frame) {
                Ok(()) => {
                    delivery.delivered += 1;
                    if let Some(ref metrics) = self.metrics {
                        metrics.message_sent(msg.payload.len());
                    }
                }
                Err(SendError::SlowConsumer) => {
                    warn!(
                        "Slow consumer {} on {}, dropping connection",
                        sub.client_id, msg.subject
                    );
                    delivery.slow_consumers += 1;
                    if let Some(ref metrics) = self.metrics {
                        metrics.slow_consumer();
                    }
                }
                Err(SendError::Closed) => {
                    trace!("Skipping closed subscriber {}", sub.client_id);
                }
                Err(e) => {
                    warn!("Failed to deliver to {}: {}", sub.client_id, e);
                }
            }
        }

        delivery
    }

    /// Write `op` to every live connection
    pub fn broadcast(&self, op: &ServerOp<'_>) -> usize {
        let writers: Vec<Arc<SharedWriter>> =
            self.clients.iter().map(|e| e.value().clone()).collect();

        let mut sent = 0;
        for writer in writers {
            match writer.send(op) {
                Ok(()) => sent += 1,
                Err(SendError::SlowConsumer) => {
                    if let Some(ref metrics) = self.metrics {
                        metrics.slow_consumer();
                    }
                }
                Err(_) => {}
            }
        }
        sent
    }
}
