use bytes::Bytes;

pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, crate::Error> {
        self.ensure_remaining(1)?;
        let res = self.buf[self.pos];
        self.pos += 1;

        Ok(res)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, crate::Error> {
        self.ensure_remaining(2)?;
        let res = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;

        Ok(res)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, crate::Error> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_variable_int(&mut self) -> Result<usize, crate::Error> {
        let mut value: usize = 0;
        let mut multiplier = 1;

        for _ in 0..4 {
            let byte = self.read_u8()?;
            value += (byte & 0x7F) as usize * multiplier;

            if byte & 0x80 == 0 {
                return Ok(value);
            }

            multiplier *= 128;
        }

        Err(crate::Error::MalformedRemainingLength)
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], crate::Error> {
        self.ensure_remaining(len)?;
        let res = &self.buf[self.pos..self.pos + len];
        self.pos += len;

        Ok(res)
    }

    pub(crate) fn read_binary(&mut self) -> Result<Bytes, crate::Error> {
        let len = self.read_u16()? as usize;
        Ok(Bytes::copy_from_slice(self.read_bytes(len)?))
    }

    pub(crate) fn read_utf8(&mut self) -> Result<String, crate::Error> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;

        core::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| crate::Error::InvalidUtf8)
    }

    pub(crate) fn read_all(&mut self) -> Bytes {
        let res = Bytes::copy_from_slice(&self.buf[self.pos..]);
        self.pos = self.buf.len();
        res
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), crate::Error> {
        self.read_bytes(len).map(|_| ())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn expect_empty(&self) -> Result<(), crate::Error> {
        if !self.is_empty() {
            Err(crate::Error::MalformedPacket)
        } else {
            Ok(())
        }
    }

    fn ensure_remaining(&self, n: usize) -> Result<(), crate::Error> {
        // Frames are complete by the time they reach the cursor, so running
        // short means the remaining length lied.
        if self.remaining() < n {
            Err(crate::Error::MalformedPacket)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian() {
        let buf = [0x01, 0x02, 0x00, 0x00, 0x01, 0x00];
        let mut cursor = Cursor::new(&buf);

        assert_eq!(cursor.read_u16().unwrap(), 0x0102);
        assert_eq!(cursor.read_u32().unwrap(), 0x0000_0100);
        assert!(cursor.is_empty());
    }

    #[test]
    fn variable_int_multibyte() {
        let buf = [0xC1, 0x02];
        let mut cursor = Cursor::new(&buf);

        assert_eq!(cursor.read_variable_int().unwrap(), 321);
    }

    #[test]
    fn short_read_is_malformed() {
        let buf = [0x00, 0x05, b'a'];
        let mut cursor = Cursor::new(&buf);

        assert!(matches!(
            cursor.read_utf8(),
            Err(crate::Error::MalformedPacket)
        ));
    }

    #[test]
    fn invalid_utf8() {
        let buf = [0x00, 0x02, 0xC3, 0x28];
        let mut cursor = Cursor::new(&buf);

        assert!(matches!(cursor.read_utf8(), Err(crate::Error::InvalidUtf8)));
    }
}
