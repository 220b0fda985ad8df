//! PUB handling

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use super::Connection;
use crate::protocol::{Message, ProtocolError};
use crate::subject::Validation;

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Validate the subject and fan the message out to all matching subscriptions
    pub(crate) fn handle_publish(
        &mut self,
        subject: String,
        reply_to: Option<String>,
        payload: Bytes,
    ) -> Result<(), ProtocolError> {
        Validation::from_pedantic(self.pedantic)
            .literal(&subject)
            .map_err(|_| ProtocolError::InvalidSubject)?;

        if let Some(ref metrics) = self.shared.metrics {
            metrics.message_received(payload.len());
        }

        let msg = Message {
            subject,
            reply_to,
            payload,
        };
        let delivery = self.shared.dispatcher.publish(&msg);
        trace!(
            "{} published {} ({} bytes) to {} subscribers",
            self.id,
            msg.subject,
            msg.payload.len(),
            delivery.delivered
        );

        self.ok();
        Ok(())
    }
}
