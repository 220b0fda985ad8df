//! Frame Encoder

use std::fmt::Write;

use bytes::{BufMut, BytesMut};

use crate::protocol::{EncodeError, ServerOp, CR_LF};

/// Server frame encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Append the wire form of `op` to `buf`
    pub fn encode(&self, op: &ServerOp<'_>, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match op {
            ServerOp::Info(info) => {
                let json = serde_json::to_vec(info)?;
                buf.reserve(5 + json.len() + CR_LF.len());
                buf.put_slice(b"INFO ");
                buf.put_slice(&json);
                buf.put_slice(CR_LF);
            }
            ServerOp::Msg {
                subject,
                sid,
                reply_to,
                payload,
            } => {
                buf.reserve(subject.len() + sid.len() + payload.len() + 32);
                match reply_to {
                    Some(reply) => write!(buf, "MSG {} {} {} {}\r\n", subject, sid, reply, payload.len())?,
                    None => write!(buf, "MSG {} {} {}\r\n", subject, sid, payload.len())?,
                }
                buf.put_slice(payload);
                buf.put_slice(CR_LF);
            }
            ServerOp::Ping => buf.put_slice(b"PING\r\n"),
            ServerOp::Pong => buf.put_slice(b"PONG\r\n"),
            ServerOp::Ok => buf.put_slice(b"+OK\r\n"),
            ServerOp::Err(err) => write!(buf, "-ERR '{}'\r\n", err)?,
        }
        Ok(())
    }
}
