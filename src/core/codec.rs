//! Tokio codec for length-prefixed frames.
//!
//! Bytes from the socket accumulate in the `Framed` read buffer. Each
//! `decode` call extracts at most one complete frame; an incomplete frame
//! leaves the buffer untouched so no partial state leaks between reads.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::core::frame::{Frame, HEADER_LEN, LENGTH_PREFIX_LEN, OPCODE_LEN};
use crate::error::{constants, ProtocolError};

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length < OPCODE_LEN {
            return Err(ProtocolError::Decode(constants::ERR_FRAME_TOO_SHORT.into()));
        }
        if length > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(length));
        }

        let total = LENGTH_PREFIX_LEN + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(LENGTH_PREFIX_LEN);
        let opcode = frame.get_u16_le();
        Ok(Some(Frame::raw(opcode, frame.to_vec())))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = OPCODE_LEN + item.payload.len();
        if length > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(length));
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        item.write_to(dst);
        Ok(())
    }
}
