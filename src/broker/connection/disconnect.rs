//! Connection teardown

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::Connection;

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Release everything the connection owns. Safe to call more than once.
    ///
    /// After this returns the client is absent from the client table and none
    /// of its subscriptions remain in the sublist.
    pub fn handle_disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // Close first so concurrent publishers see Closed instead of queueing
        self.writer.close();
        self.shared.clients.remove(&self.id);

        let removed = self.shared.sublist.remove_client(self.id);
        self.subscriptions.clear();

        if let Some(ref metrics) = self.shared.metrics {
            metrics.client_disconnected();
            metrics.subscriptions_removed(removed);
        }
        debug!(
            "Client {} ({}) disconnected, {} subscriptions removed",
            self.id, self.addr, removed
        );
    }
}
