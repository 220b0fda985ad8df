//! CONNECT handling

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::Connection;
use crate::protocol::{ConnectOptions, ProtocolError};

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Apply CONNECT options and, when required, check credentials
    pub(crate) fn handle_connect(&mut self, raw: &str) -> Result<(), ProtocolError> {
        let options = ConnectOptions::parse(raw)?;

        if let Some(verbose) = options.verbose {
            self.verbose = verbose;
        }
        if let Some(pedantic) = options.pedantic {
            self.pedantic = pedantic;
        }

        if !self.authenticated {
            if !self
                .shared
                .auth
                .authenticate(options.user.as_deref(), options.pass.as_deref())
            {
                warn!(
                    "Authorization failed for {} ({}), user {:?}",
                    self.id, self.addr, options.user
                );
                return Err(ProtocolError::AuthFailed);
            }
            debug!("Client {} authorized", self.id);
            self.authenticated = true;
        }

        self.ok();
        Ok(())
    }
}
