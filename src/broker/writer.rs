//! Direct write buffer for bypassing channel overhead.
//!
//! SharedWriter lets the dispatcher append frames straight into a
//! per-connection buffer, which the connection loop flushes to its socket.
//! It also enforces the outbound cap: bytes buffered plus bytes handed to an
//! in-progress socket write may never exceed `max_outbound`.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::codec::Encoder;
use crate::protocol::{EncodeError, ServerOp};

/// Error when sending to a SharedWriter
#[derive(Debug)]
pub enum SendError {
    /// Connection is closed
    Closed,
    /// Outbound cap exceeded; the connection has been marked for closing
    SlowConsumer,
    /// Frame could not be encoded
    Encoding(EncodeError),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Closed => write!(f, "connection closed"),
            SendError::SlowConsumer => write!(f, "slow consumer"),
            SendError::Encoding(e) => write!(f, "encoding error: {}", e),
        }
    }
}

impl std::error::Error for SendError {}

struct Outbound {
    /// Encoded frames waiting to be written
    buf: BytesMut,
    /// Bytes taken by the connection and not yet reported written
    in_flight: usize,
}

/// Shared write buffer for direct writes from the dispatcher to a connection.
pub struct SharedWriter {
    outbound: Mutex<Outbound>,
    /// Notification when buffer has new data or the writer was closed
    notify: Notify,
    /// Notification that aborts an in-progress socket write
    closed: Notify,
    alive: AtomicBool,
    slow_consumer: AtomicBool,
    max_outbound: usize,
    encoder: Encoder,
}

impl SharedWriter {
    pub fn new(max_outbound: usize) -> Self {
        Self {
            outbound: Mutex::new(Outbound {
                buf: BytesMut::with_capacity(2048),
                in_flight: 0,
            }),
            notify: Notify::new(),
            closed: Notify::new(),
            alive: AtomicBool::new(true),
            slow_consumer: AtomicBool::new(false),
            max_outbound,
            encoder: Encoder::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Whether this writer was closed for exceeding its outbound cap
    pub fn is_slow_consumer(&self) -> bool {
        self.slow_consumer.load(Ordering::Acquire)
    }

    /// Mark the connection as closed
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.notify.notify_one();
        self.closed.notify_one();
    }

    /// Get the notify handle for the connection loop
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// Resolves once the writer has been closed
    pub fn closed(&self) -> tokio::sync::futures::Notified<'_> {
        self.closed.notified()
    }

    /// Take all buffered data; it counts as in flight until [`written`](Self::written)
    pub fn take_buffer(&self) -> BytesMut {
        let mut out = self.outbound.lock();
        let data = out.buf.split();
        out.in_flight += data.len();
        data
    }

    /// Report that `n` bytes taken from the buffer reached the socket
    pub fn written(&self, n: usize) {
        let mut out = self.outbound.lock();
        out.in_flight = out.in_flight.saturating_sub(n);
    }

    /// Discard everything buffered or in flight
    pub fn discard(&self) {
        let mut out = self.outbound.lock();
        out.buf.clear();
        out.in_flight = 0;
    }

    /// Bytes buffered plus bytes in flight
    pub fn pending_bytes(&self) -> usize {
        let out = self.outbound.lock();
        out.buf.len() + out.in_flight
    }

    /// Append a frame.
    ///
    /// If the frame would push the pending total past the cap, it is dropped,
    /// the writer is closed as a slow consumer, and `SlowConsumer` is
    /// returned.
    pub fn send(&self, op: &ServerOp<'_>) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }

        let was_empty = {
            let mut out = self.outbound.lock();
            let start_len = out.buf.len();
            if let Err(e) = self.encoder.encode(op, &mut out.buf) {
                out.buf.truncate(start_len);
                return Err(SendError::Encoding(e));
            }

            let pending = out.buf.len() + out.in_flight;
            if pending > self.max_outbound {
                out.buf.truncate(start_len);
                drop(out);
                self.slow_consumer.store(true, Ordering::Release);
                self.close();
                return Err(SendError::SlowConsumer);
            }
            start_len == 0
        };

        // Only notify if buffer was empty - coalesces notifications during bursts
        if was_empty {
            self.notify.notify_one();
        }
        Ok(())
    }
}

impl std::fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWriter")
            .field("pending", &self.pending_bytes())
            .field("alive", &self.is_alive())
            .field("slow_consumer", &self.is_slow_consumer())
            .finish()
    }
}
