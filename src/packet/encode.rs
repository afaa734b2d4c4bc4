use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{self, ProtocolVersion};

/// Largest value the four-byte variable length integer can carry.
pub(crate) const MAX_VARIABLE_INT: usize = 268_435_455;

pub(crate) trait EncodePacket {
    const PACKET_TYPE: protocol::PacketType;
    fn flags(&self) -> u8;
    fn required_space(&self, version: ProtocolVersion) -> usize;
    fn encode_body(&self, cursor: &mut Cursor, version: ProtocolVersion)
    -> Result<(), crate::Error>;
}

pub(crate) trait Encode {
    fn encode(&self, cursor: &mut Cursor) -> Result<(), crate::Error>;
    fn required_space(&self) -> usize;
}

pub(crate) fn variable_int_len(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

pub(crate) fn remaining_length(mut len: usize, cursor: &mut Cursor) -> Result<usize, crate::Error> {
    if len > MAX_VARIABLE_INT {
        return Err(crate::Error::PacketTooLarge {
            size: len,
            max: MAX_VARIABLE_INT,
        });
    }

    let mut i = 0;

    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;

        if len > 0 {
            byte |= 0x80;
        }

        cursor.write_u8(byte)?;
        i += 1;

        if len == 0 {
            break;
        }
    }

    Ok(i)
}

pub(crate) struct Cursor {
    buf: BytesMut,
}

impl Cursor {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub(crate) fn write_u8(&mut self, byte: u8) -> Result<(), crate::Error> {
        self.buf.put_u8(byte);
        Ok(())
    }

    pub(crate) fn write_u16(&mut self, value: u16) -> Result<(), crate::Error> {
        self.buf.put_u16(value);
        Ok(())
    }

    pub(crate) fn write_u32(&mut self, value: u32) -> Result<(), crate::Error> {
        self.buf.put_u32(value);
        Ok(())
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), crate::Error> {
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub(crate) fn write_binary_chunk(&mut self, bytes: &[u8]) -> Result<(), crate::Error> {
        let len = u16::try_from(bytes.len()).map_err(|_| crate::Error::PacketTooLarge {
            size: bytes.len(),
            max: u16::MAX as usize,
        })?;

        self.write_u16(len)?;
        self.write_bytes(bytes)
    }

    fn write_utf8(&mut self, value: &str) -> Result<(), crate::Error> {
        self.write_binary_chunk(value.as_bytes())
    }
}

impl Encode for u8 {
    fn encode(&self, cursor: &mut Cursor) -> Result<(), crate::Error> {
        cursor.write_u8(*self)
    }

    fn required_space(&self) -> usize {
        1
    }
}

impl Encode for u16 {
    fn encode(&self, cursor: &mut Cursor) -> Result<(), crate::Error> {
        cursor.write_u16(*self)
    }

    fn required_space(&self) -> usize {
        2
    }
}

impl Encode for u32 {
    fn encode(&self, cursor: &mut Cursor) -> Result<(), crate::Error> {
        cursor.write_u32(*self)
    }

    fn required_space(&self) -> usize {
        4
    }
}

impl Encode for &str {
    fn encode(&self, cursor: &mut Cursor) -> Result<(), crate::Error> {
        cursor.write_utf8(self)
    }

    fn required_space(&self) -> usize {
        self.len() + 2
    }
}

impl Encode for String {
    fn encode(&self, cursor: &mut Cursor) -> Result<(), crate::Error> {
        cursor.write_utf8(self)
    }

    fn required_space(&self) -> usize {
        self.len() + 2
    }
}

impl Encode for Bytes {
    fn encode(&self, cursor: &mut Cursor) -> Result<(), crate::Error> {
        cursor.write_binary_chunk(self)
    }

    fn required_space(&self) -> usize {
        self.len() + 2
    }
}
