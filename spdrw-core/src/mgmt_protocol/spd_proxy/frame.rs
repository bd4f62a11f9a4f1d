//! Reply framing for the SPD proxy protocol.
//!
//! Every reply starts with a header byte. DATA frames carry a length, up to
//! 32 payload bytes and an additive checksum; ALERT frames carry one code
//! byte. Anything else means the stream is out of sync, so the decoder drops
//! what it has buffered and reports a protocol error.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::command::{Command, MAX_READ};
use crate::checksum::sum8;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

pub const HEADER_DATA: u8 = b'&';
pub const HEADER_ALERT: u8 = b'@';

/// Largest frame on the wire: header, length, payload, checksum.
pub const MAX_FRAME: usize = 1 + 1 + MAX_READ + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Reply to the outstanding request, checksum already verified
    Data(Bytes),
    /// Unsolicited alert code
    Alert(u8),
}

#[derive(Debug, Default)]
pub struct ProxyCodec;

impl Decoder for ProxyCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(&header) = src.first() else {
            return Ok(None);
        };

        match header {
            HEADER_ALERT => {
                if src.len() < 2 {
                    return Ok(None);
                }
                let code = src[1];
                src.advance(2);
                Ok(Some(Frame::Alert(code)))
            }
            HEADER_DATA => {
                if src.len() < 2 {
                    return Ok(None);
                }
                let length = src[1] as usize;
                if length > MAX_READ {
                    src.clear();
                    return Err(Error::Protocol(format!(
                        "DATA frame length {length} exceeds {MAX_READ}"
                    )));
                }
                let total = 2 + length + 1;
                if src.len() < total {
                    src.reserve(total - src.len());
                    return Ok(None);
                }

                let mut frame = src.split_to(total);
                frame.advance(2);
                let payload = frame.split_to(length).freeze();
                let received = frame[0];
                let computed = sum8(&payload);
                if computed != received {
                    return Err(Error::Checksum { computed, received });
                }
                Ok(Some(Frame::Data(payload)))
            }
            other => {
                warn!(
                    header = format_args!("0x{other:02X}"),
                    discarded = src.len(),
                    "unrecognized reply header, resynchronizing"
                );
                src.clear();
                Err(Error::Protocol(format!(
                    "unrecognized reply header 0x{other:02X}"
                )))
            }
        }
    }
}

impl Encoder<Command> for ProxyCodec {
    type Error = Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<()> {
        command.encode(dst);
        Ok(())
    }
}

/// Wire form of a DATA reply carrying `payload`.
pub fn encode_data(payload: &[u8], dst: &mut BytesMut) {
    use bytes::BufMut;
    dst.put_u8(HEADER_DATA);
    dst.put_u8(payload.len() as u8);
    dst.put_slice(payload);
    dst.put_u8(sum8(payload));
}
