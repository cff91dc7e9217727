//! # Bit Stream Codec
//!
//! Fields are packed into one continuous little-endian bit stream with no
//! padding between them. A 5-bit field followed by a 32-bit field puts the
//! 32-bit field at bit 5 of the same byte; readers must consume fields in the
//! identical order or every following field misaligns silently.
//!
//! [`PacketWriter`] is an open packet: it only exposes bit-level writes, and
//! its single consuming [`PacketWriter::finish`] is the one place the stream
//! is padded to a byte boundary. There is no way to align mid-packet.
//!
//! ```rust
//! use realm_protocol::core::bitstream::{BitReader, PacketWriter};
//!
//! let mut writer = PacketWriter::new();
//! writer.write_bits(0b01011, 5);
//! writer.write_u32(0x0979_98A0);
//! let bytes = writer.finish();
//! assert_eq!(bytes.len(), 5);
//!
//! let mut reader = BitReader::new(&bytes);
//! assert_eq!(reader.read_bits(5).unwrap(), 0b01011);
//! assert_eq!(reader.read_u32().unwrap(), 0x0979_98A0);
//! ```

use crate::error::{constants, ProtocolError, Result};

/// Largest field a single `write_bits`/`read_bits` call may carry.
pub const MAX_FIELD_BITS: u32 = 64;

/// Wide strings longer than this need the 15-bit length form.
const SHORT_STRING_MAX: usize = 0x7F;
const LONG_STRING_MAX: usize = 0x7FFF;

#[inline]
fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// An open packet being serialized as a bit stream.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
    bit_position: usize,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
            bit_position: 0,
        }
    }

    /// Bits written so far.
    pub fn bit_len(&self) -> usize {
        self.bit_position
    }

    /// Append the low `bits` bits of `value`, least significant bit first.
    ///
    /// # Panics
    /// Panics if `bits` exceeds 64.
    pub fn write_bits(&mut self, value: u64, bits: u32) {
        assert!(
            bits <= MAX_FIELD_BITS,
            "bit field of {bits} bits exceeds {MAX_FIELD_BITS}"
        );

        let mut value = value & low_mask(bits);
        let mut remaining = bits as usize;

        while remaining > 0 {
            let bit_offset = self.bit_position % 8;
            if bit_offset == 0 {
                self.buffer.push(0);
            }

            let take = remaining.min(8 - bit_offset);
            let chunk = (value & low_mask(take as u32)) as u8;
            if let Some(last) = self.buffer.last_mut() {
                *last |= chunk << bit_offset;
            }

            value = value.checked_shr(take as u32).unwrap_or(0);
            remaining -= take;
            self.bit_position += take;
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(u64::from(value), 1);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(u64::from(value), 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(u64::from(value), 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(u64::from(value), 32);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bits(value, 64);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bits(u64::from(value as u32), 32);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bits(u64::from(value.to_bits()), 32);
    }

    /// Each byte goes in as an 8-bit field at the current bit offset.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.bit_position % 8 == 0 {
            self.buffer.extend_from_slice(bytes);
            self.bit_position += bytes.len() * 8;
        } else {
            for &byte in bytes {
                self.write_u8(byte);
            }
        }
    }

    /// Length-prefixed UTF-16 string.
    ///
    /// Layout: 1 "extended" bit, then the code-unit count in 7 bits (or 15
    /// when extended), then 16 bits per code unit.
    pub fn write_wide_string(&mut self, value: &str) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        if units.len() > LONG_STRING_MAX {
            return Err(ProtocolError::Decode(constants::ERR_STRING_TOO_LONG.into()));
        }

        let extended = units.len() > SHORT_STRING_MAX;
        self.write_bool(extended);
        self.write_bits(units.len() as u64, if extended { 15 } else { 7 });
        for unit in units {
            self.write_u16(unit);
        }
        Ok(())
    }

    /// Close the packet, zero-padding to the next byte boundary.
    pub fn finish(self) -> Vec<u8> {
        // Partially written bytes were pushed as zero, so padding is implicit.
        self.buffer
    }
}

/// Cursor over a received bit stream.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_position: 0,
        }
    }

    pub fn bit_position(&self) -> usize {
        self.bit_position
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_position
    }

    /// Read `bits` bits, least significant bit first.
    ///
    /// # Panics
    /// Panics if `bits` exceeds 64.
    pub fn read_bits(&mut self, bits: u32) -> Result<u64> {
        assert!(
            bits <= MAX_FIELD_BITS,
            "bit field of {bits} bits exceeds {MAX_FIELD_BITS}"
        );

        let available = self.remaining_bits();
        if (bits as usize) > available {
            return Err(ProtocolError::UnexpectedEof {
                needed: bits as usize,
                available,
            });
        }

        let mut value = 0u64;
        let mut filled = 0usize;
        while filled < bits as usize {
            let byte = self.data[self.bit_position / 8];
            let bit_offset = self.bit_position % 8;
            let take = (bits as usize - filled).min(8 - bit_offset);
            let chunk = u64::from(byte >> bit_offset) & low_mask(take as u32);

            value |= chunk << filled;
            filled += take;
            self.bit_position += take;
        }

        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_bits(32)? as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_bits(64)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let available = self.remaining_bits();
        if len * 8 > available {
            return Err(ProtocolError::UnexpectedEof {
                needed: len * 8,
                available,
            });
        }

        if self.bit_position % 8 == 0 {
            let start = self.bit_position / 8;
            self.bit_position += len * 8;
            return Ok(self.data[start..start + len].to_vec());
        }

        (0..len).map(|_| self.read_u8()).collect()
    }

    /// Fixed-size byte field.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    pub fn read_wide_string(&mut self) -> Result<String> {
        let extended = self.read_bool()?;
        let len = self.read_bits(if extended { 15 } else { 7 })? as usize;
        let units = (0..len)
            .map(|_| self.read_u16())
            .collect::<Result<Vec<u16>>>()?;

        String::from_utf16(&units)
            .map_err(|_| ProtocolError::Decode(constants::ERR_INVALID_UTF16.into()))
    }
}

/// A value that serializes itself into an open packet.
pub trait Writable {
    fn write(&self, writer: &mut PacketWriter) -> Result<()>;
}

/// A value that deserializes itself from a bit stream.
pub trait Readable: Sized {
    fn read(reader: &mut BitReader<'_>) -> Result<Self>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unaligned_field_follows_previous_field() {
        let magic = 0x0979_98A0u32;
        let mut writer = PacketWriter::new();
        writer.write_bits(0b01011, 5);
        writer.write_u32(magic);
        let bytes = writer.finish();

        let expected = ((u64::from(magic) << 5) | 0b01011).to_le_bytes();
        assert_eq!(bytes, expected[..5].to_vec());
    }

    #[test]
    fn test_finish_pads_to_byte_boundary() {
        let mut writer = PacketWriter::new();
        writer.write_bits(0b111, 3);
        assert_eq!(writer.bit_len(), 3);
        assert_eq!(writer.finish(), vec![0b0000_0111]);

        let mut writer = PacketWriter::new();
        writer.write_u8(0xAB);
        writer.write_bool(true);
        assert_eq!(writer.finish(), vec![0xAB, 0x01]);
    }

    #[test]
    fn test_read_past_end_fails() {
        let bytes = [0xFFu8; 2];
        let mut reader = BitReader::new(&bytes);
        reader.read_bits(10).unwrap();
        match reader.read_bits(7) {
            Err(ProtocolError::UnexpectedEof { needed, available }) => {
                assert_eq!(needed, 7);
                assert_eq!(available, 6);
            }
            other => panic!("expected eof, got {other:?}"),
        }
        // A failed read does not move the cursor
        assert_eq!(reader.bit_position(), 10);
    }

    #[test]
    #[should_panic(expected = "exceeds 64")]
    fn test_oversized_write_panics() {
        let mut writer = PacketWriter::new();
        writer.write_bits(0, 65);
    }

    #[test]
    #[should_panic(expected = "exceeds 64")]
    fn test_oversized_read_panics() {
        let bytes = [0u8; 16];
        let mut reader = BitReader::new(&bytes);
        let _ = reader.read_bits(65);
    }

    #[test]
    fn test_full_width_fields() {
        let mut writer = PacketWriter::new();
        writer.write_bits(1, 1);
        writer.write_u64(u64::MAX - 1);
        writer.write_i32(-42);
        writer.write_f32(1.5);
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(1).unwrap(), 1);
        assert_eq!(reader.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(reader.read_i32().unwrap(), -42);
        assert_eq!(reader.read_f32().unwrap(), 1.5);
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut writer = PacketWriter::new();
        writer.write_bits(0b10, 2);
        writer.write_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 5);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(2).unwrap(), 0b10);
        assert_eq!(reader.read_array::<4>().unwrap(), [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_wide_string_short_and_extended() {
        let long = "x".repeat(200);
        let mut writer = PacketWriter::new();
        writer.write_wide_string("héllo").unwrap();
        writer.write_wide_string(&long).unwrap();
        writer.write_wide_string("").unwrap();
        let bytes = writer.finish();

        // 1 + 7 + 5*16, then 1 + 15 + 200*16, then 1 + 7
        assert_eq!(bytes.len(), (88 + 3216 + 8 + 7) / 8);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_wide_string().unwrap(), "héllo");
        assert_eq!(reader.read_wide_string().unwrap(), long);
        assert_eq!(reader.read_wide_string().unwrap(), "");
    }

    #[test]
    fn test_wide_string_too_long() {
        let mut writer = PacketWriter::new();
        let huge = "a".repeat(LONG_STRING_MAX + 1);
        assert!(writer.write_wide_string(&huge).is_err());
    }
}
