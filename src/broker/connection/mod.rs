//! Client Connection Handler
//!
//! Handles individual client connections: command decoding, the auth gate,
//! and flushing the connection's SharedWriter to the socket.
//!
//! Commands from one connection are processed strictly in arrival order on
//! the connection's own task, which gives per-publisher delivery ordering.

mod connect;
mod disconnect;
mod publish;
mod subscribe;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, trace, warn};

use crate::auth::AuthProvider;
use crate::broker::{BrokerConfig, Dispatcher, SendError, SharedWriter};
use crate::codec::{Decoder, Encoder};
use crate::metrics::Metrics;
use crate::protocol::{Op, ProtocolError, ServerInfo, ServerOp};
use crate::subject::{ClientId, Sublist, Subscription};

/// Upper bound on writing a final error line to a closing connection
const FINAL_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection error types
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    Protocol(ProtocolError),
    Timeout,
    Shutdown,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "IO error: {}", e),
            ConnectionError::Protocol(e) => write!(f, "Protocol error: {}", e),
            ConnectionError::Timeout => write!(f, "Authorization timeout"),
            ConnectionError::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<ProtocolError> for ConnectionError {
    fn from(e: ProtocolError) -> Self {
        ConnectionError::Protocol(e)
    }
}

/// State shared by every connection of a broker
#[derive(Clone)]
pub struct Shared {
    pub sublist: Arc<Sublist>,
    pub clients: Arc<DashMap<ClientId, Arc<SharedWriter>>>,
    pub dispatcher: Dispatcher,
    pub auth: Arc<AuthProvider>,
    pub info: Arc<ServerInfo>,
    pub config: BrokerConfig,
    pub metrics: Option<Arc<Metrics>>,
}

/// Connection handler - generic over the stream type
pub struct Connection<S> {
    pub(crate) stream: S,
    pub(crate) addr: SocketAddr,
    pub(crate) id: ClientId,
    pub(crate) decoder: Decoder,
    pub(crate) read_buf: BytesMut,
    /// Outbound buffer, also registered in the client table
    pub(crate) writer: Arc<SharedWriter>,
    pub(crate) shared: Shared,
    /// Subscriptions owned by this connection, keyed by sid
    pub(crate) subscriptions: AHashMap<Arc<str>, Subscription>,
    pub(crate) verbose: bool,
    pub(crate) pedantic: bool,
    pub(crate) authenticated: bool,
    pub(crate) closed: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, addr: SocketAddr, id: ClientId, shared: Shared) -> Self {
        let config = &shared.config;
        Self {
            stream,
            addr,
            id,
            decoder: Decoder::new()
                .with_max_control_line(config.max_control_line)
                .with_max_payload(config.max_payload),
            read_buf: BytesMut::with_capacity(4096),
            writer: Arc::new(SharedWriter::new(config.max_outbound)),
            verbose: config.verbose,
            pedantic: config.pedantic,
            authenticated: !shared.auth.is_required(),
            shared,
            subscriptions: AHashMap::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Run the connection until the client leaves or is dropped.
    ///
    /// All subscriptions are removed from the sublist before returning.
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        let result = self.serve().await;
        self.handle_disconnect();
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        // Banner goes out before the client is reachable by broadcasts
        let info = self.shared.info.clone();
        self.send(&ServerOp::Info(&info));

        self.shared.clients.insert(self.id, self.writer.clone());
        if let Some(ref metrics) = self.shared.metrics {
            metrics.client_connected();
        }
        debug!("Client {} connected from {}", self.id, self.addr);

        let auth_deadline = (!self.authenticated).then(|| Instant::now() + self.shared.config.auth_timeout);

        loop {
            // Only armed until the client authenticates
            let auth_wait = auth_deadline.filter(|_| !self.authenticated);

            tokio::select! {
                // Read from socket
                result = self.stream.read_buf(&mut self.read_buf) => {
                    match result {
                        Ok(0) => {
                            if self.decoder.awaiting_payload() {
                                debug!("Connection closed from {} mid-payload", self.addr);
                            } else {
                                debug!("Connection closed from {}", self.addr);
                            }
                            return Ok(());
                        }
                        Ok(_) => self.process_input().await?,
                        Err(e) => {
                            debug!("Read error from {}: {}", self.addr, e);
                            return Err(e.into());
                        }
                    }
                }

                // Flush outgoing frames from SharedWriter buffer
                _ = self.writer.notified() => {
                    self.flush().await?;
                }

                // Authorization deadline
                _ = async move {
                    match auth_wait {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    warn!("Authorization timeout for {} ({})", self.id, self.addr);
                    let _ = self.reject(ProtocolError::AuthRequired).await;
                    return Err(ConnectionError::Timeout);
                }
            }
        }
    }

    /// Decode and handle every complete command in the read buffer
    async fn process_input(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(op)) => {
                    if let Err(e) = self.handle_op(op) {
                        self.reject(e).await?;
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) => self.reject(e).await?,
            }
        }
    }

    /// Handle a decoded command
    fn handle_op(&mut self, op: Op) -> Result<(), ProtocolError> {
        trace!("{} <- {}", self.id, op.name());

        if !self.authenticated && !matches!(op, Op::Connect { .. } | Op::Ping | Op::Pong | Op::Info) {
            return Err(ProtocolError::AuthRequired);
        }

        match op {
            Op::Connect { options } => self.handle_connect(&options),
            Op::Pub {
                subject,
                reply_to,
                payload,
            } => self.handle_publish(subject, reply_to, payload),
            Op::Sub { subject, sid } => self.handle_subscribe(&subject, &sid),
            Op::Unsub { sid } => self.handle_unsubscribe(&sid),
            Op::Ping => {
                self.send(&ServerOp::Pong);
                Ok(())
            }
            Op::Pong => Ok(()),
            Op::Info => {
                let info = self.shared.info.clone();
                self.send(&ServerOp::Info(&info));
                Ok(())
            }
        }
    }

    /// Report an error to the client; fatal errors end the connection
    async fn reject(&mut self, err: ProtocolError) -> Result<(), ConnectionError> {
        if let Some(ref metrics) = self.shared.metrics {
            metrics.protocol_error(&err);
        }
        self.send(&ServerOp::Err(&err));

        if err.is_fatal() {
            debug!("Dropping {} ({}): {}", self.id, self.addr, err);
            let _ = timeout(FINAL_WRITE_TIMEOUT, self.flush()).await;
            return Err(ConnectionError::Protocol(err));
        }
        debug!("Protocol error from {}: {}", self.id, err);
        Ok(())
    }

    /// Queue a frame on this connection's own writer
    pub(crate) fn send(&self, op: &ServerOp<'_>) {
        match self.writer.send(op) {
            Ok(()) => {}
            Err(SendError::SlowConsumer) => {
                warn!("Slow consumer {} ({})", self.id, self.addr);
                if let Some(ref metrics) = self.shared.metrics {
                    metrics.slow_consumer();
                }
            }
            Err(SendError::Closed) => trace!("Dropped frame for closed {}", self.id),
            Err(e) => error!("Failed to queue frame for {}: {}", self.id, e),
        }
    }

    /// Acknowledge a command when the client asked for verbose mode
    pub(crate) fn ok(&self) {
        if self.verbose {
            self.send(&ServerOp::Ok);
        }
    }

    /// Write everything buffered to the socket
    async fn flush(&mut self) -> Result<(), ConnectionError> {
        loop {
            if self.writer.is_slow_consumer() {
                return self.drop_slow_consumer().await;
            }

            let data = self.writer.take_buffer();
            if data.is_empty() {
                break;
            }
            let len = data.len();

            tokio::select! {
                biased;

                // Abandon a stalled write once the writer has been closed
                _ = self.writer.closed() => {
                    if self.writer.is_slow_consumer() {
                        return self.drop_slow_consumer().await;
                    }
                    return Err(ConnectionError::Shutdown);
                }
                result = self.stream.write_all(&data) => {
                    result?;
                    self.writer.written(len);
                }
            }
        }

        if !self.writer.is_alive() {
            if self.writer.is_slow_consumer() {
                return self.drop_slow_consumer().await;
            }
            return Err(ConnectionError::Shutdown);
        }
        Ok(())
    }

    /// Discard pending output and send a best-effort SlowConsumer notice
    async fn drop_slow_consumer(&mut self) -> Result<(), ConnectionError> {
        self.writer.discard();

        let err = ProtocolError::SlowConsumer;
        if let Some(ref metrics) = self.shared.metrics {
            metrics.protocol_error(&err);
        }

        let mut buf = BytesMut::new();
        if Encoder::new().encode(&ServerOp::Err(&err), &mut buf).is_ok() {
            let _ = timeout(FINAL_WRITE_TIMEOUT, self.stream.write_all(&buf)).await;
        }
        warn!("Dropped slow consumer {} ({})", self.id, self.addr);
        Err(ConnectionError::Protocol(err))
    }
}
