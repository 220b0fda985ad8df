//! SUB and UNSUB handling

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use super::Connection;
use crate::protocol::ProtocolError;
use crate::subject::{Subscription, Validation};

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Register a subscription under a sid not yet used on this connection
    pub(crate) fn handle_subscribe(&mut self, subject: &str, sid: &str) -> Result<(), ProtocolError> {
        let pattern = Validation::from_pedantic(self.pedantic)
            .pattern(subject)
            .map_err(|_| ProtocolError::InvalidSubject)?;

        if self.subscriptions.contains_key(sid) {
            return Err(ProtocolError::InvalidSidTaken);
        }

        let pattern_has_wildcards = pattern.has_wildcards();
        let subscription = Subscription::new(self.id, sid, pattern);
        self.shared
            .sublist
            .insert(subscription.clone())
            .map_err(|_| ProtocolError::InvalidSubject)?;
        self.subscriptions
            .insert(subscription.sid.clone(), subscription);

        if let Some(ref metrics) = self.shared.metrics {
            metrics.subscription_added();
        }
        trace!(
            "{} subscribed to {} as {}{}",
            self.id,
            subject,
            sid,
            if pattern_has_wildcards { " (wildcard)" } else { "" }
        );

        self.ok();
        Ok(())
    }

    /// Remove the subscription registered under `sid`
    pub(crate) fn handle_unsubscribe(&mut self, sid: &str) -> Result<(), ProtocolError> {
        let subscription = self
            .subscriptions
            .remove(sid)
            .ok_or(ProtocolError::InvalidSidNoexist)?;

        self.shared
            .sublist
            .remove(subscription.pattern.as_str(), self.id, &subscription.sid);

        if let Some(ref metrics) = self.shared.metrics {
            metrics.subscriptions_removed(1);
        }
        trace!("{} unsubscribed {}", self.id, sid);

        self.ok();
        Ok(())
    }
}
