use bytes::{Buf, BytesMut};

use crate::{
    codec::Codec,
    packet::Packet,
    protocol::{FixedHeader, PacketType, ProtocolVersion},
};

/// Parses the fixed header at the start of `buf`.
///
/// Returns `Ok(None)` while the header itself is still incomplete, otherwise
/// the header and its length in bytes.
pub fn parse_fixed_header(buf: &[u8]) -> Result<Option<(FixedHeader, usize)>, crate::Error> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    let (packet_type, flags) = parse_first_byte(first)?;

    let Some((remaining_len, len_bytes)) = parse_remaining_len(&buf[1..])? else {
        return Ok(None);
    };

    let header = FixedHeader {
        packet_type,
        flags,
        remaining_len,
    };

    Ok(Some((header, 1 + len_bytes)))
}

fn parse_first_byte(byte: u8) -> Result<(PacketType, u8), crate::Error> {
    let packet_type = PacketType::try_from(byte >> 4)?;
    let flags = byte & 0x0F;

    if !packet_type.validate_flags(flags) {
        return Err(crate::Error::InvalidFlags);
    }

    Ok((packet_type, flags))
}

fn parse_remaining_len(buf: &[u8]) -> Result<Option<(usize, usize)>, crate::Error> {
    let mut remaining_len: usize = 0;
    let mut multiplier = 1;

    for (i, byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(crate::Error::MalformedRemainingLength);
        }

        remaining_len += (byte & 0x7F) as usize * multiplier;

        if (byte & 0x80) == 0 {
            return Ok(Some((remaining_len, i + 1)));
        }

        multiplier *= 128;
    }

    if buf.len() >= 4 {
        return Err(crate::Error::MalformedRemainingLength);
    }

    Ok(None)
}

#[derive(Debug)]
pub struct Assembler {
    buf: BytesMut,
    max_packet_size: usize,
}

impl Assembler {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_packet_size,
        }
    }

    pub fn feed(&mut self, input: &[u8]) {
        self.buf.extend_from_slice(input);
    }

    pub fn next_packet(
        &mut self,
        codec: &dyn Codec,
        version: ProtocolVersion,
    ) -> Result<Option<Packet>, crate::Error> {
        if let Some((packet, consumed)) = codec.decode(&self.buf, version)? {
            self.buf.advance(consumed);
            return Ok(Some(packet));
        }

        if let Some((header, header_len)) = parse_fixed_header(&self.buf)? {
            let total = header_len + header.remaining_len;

            if total > self.max_packet_size {
                return Err(crate::Error::PacketTooLarge {
                    size: total,
                    max: self.max_packet_size,
                });
            }

            self.buf.reserve(total.saturating_sub(self.buf.len()));
        }

        Ok(None)
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MqttCodec;

    const V311: ProtocolVersion = ProtocolVersion::V311;

    #[test]
    fn remaining_len_single_byte() {
        // PingReq, remaining length = 0
        let data = [0b1100_0000, 0x00];
        let (header, len) = parse_fixed_header(&data).unwrap().unwrap();

        assert_eq!(header.packet_type, PacketType::PingReq);
        assert_eq!(header.remaining_len, 0);
        assert_eq!(len, 2);
    }

    #[test]
    fn remaining_len_multibyte() {
        // PingReq, remaining length = 321
        let data = [0b1100_0000, 0xC1, 0x02];
        let (header, len) = parse_fixed_header(&data).unwrap().unwrap();

        assert_eq!(header.remaining_len, 321);
        assert_eq!(len, 3);
    }

    #[test]
    fn header_split_mid_length() {
        let data = [0b0011_0000, 0xC1];
        assert!(parse_fixed_header(&data).unwrap().is_none());
    }

    #[test]
    fn remaining_len_too_long() {
        let data = [0b1100_0000, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let err = parse_fixed_header(&data).unwrap_err();

        assert!(matches!(err, crate::Error::MalformedRemainingLength));
    }

    #[test]
    fn invalid_reserved_flags() {
        let data = [0b0110_0000, 0x02, 0x00, 0x01];
        assert!(matches!(
            parse_fixed_header(&data),
            Err(crate::Error::InvalidFlags)
        ));
    }

    #[test]
    fn body_split_across_inputs() {
        let codec = MqttCodec;
        let mut assembler = Assembler::new(1024);

        // PUBLISH "t" / payload 0x45 0x67
        assembler.feed(&[0b0011_0000, 0x05, 0x00]);
        assert!(assembler.next_packet(&codec, V311).unwrap().is_none());

        assembler.feed(&[0x01, b't', 0x45]);
        assert!(assembler.next_packet(&codec, V311).unwrap().is_none());

        assembler.feed(&[0x67]);
        let packet = assembler.next_packet(&codec, V311).unwrap().expect("packet");

        match packet {
            Packet::Publish(publish) => {
                assert_eq!(publish.topic, "t");
                assert_eq!(&publish.payload[..], &[0x45, 0x67]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn two_packets_back_to_back() {
        let codec = MqttCodec;
        let mut assembler = Assembler::new(1024);
        assembler.feed(&[0b1101_0000, 0x00, 0b1101_0000, 0x00]);

        assert_eq!(
            assembler.next_packet(&codec, V311).unwrap(),
            Some(Packet::PingResp)
        );
        assert_eq!(
            assembler.next_packet(&codec, V311).unwrap(),
            Some(Packet::PingResp)
        );
        assert!(assembler.next_packet(&codec, V311).unwrap().is_none());
    }

    #[test]
    fn oversized_packet() {
        let codec = MqttCodec;
        let mut assembler = Assembler::new(16);
        assembler.feed(&[0b0011_0000, 0x7F]);

        assert!(matches!(
            assembler.next_packet(&codec, V311),
            Err(crate::Error::PacketTooLarge { size: 129, max: 16 })
        ));
    }
}
