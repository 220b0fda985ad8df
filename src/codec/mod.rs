//! Text Protocol Codec
//!
//! Provides incremental decoding of client commands and encoding of server
//! frames. Both sides share the CR-LF line terminator.

mod decode;
mod encode;


pub use decode::Decoder;
pub use encode::Encoder;

use crate::protocol::CR_LF;

/// Position of the first CR-LF in `buf`
#[inline]
pub fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CR_LF.len()).position(|w| w == CR_LF)
}
