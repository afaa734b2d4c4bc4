use bytes::Bytes;

use crate::{packet::Packet, parser::parse_fixed_header, protocol::ProtocolVersion};

/// Encodes and decodes whole control packets for a protocol revision.
pub trait Codec: Send + Sync {
    fn encode(&self, packet: &Packet, version: ProtocolVersion) -> crate::Result<Bytes>;

    /// Decodes the packet at the start of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold a complete packet,
    /// otherwise the packet and the number of bytes it occupied.
    fn decode(&self, buf: &[u8], version: ProtocolVersion) -> crate::Result<Option<(Packet, usize)>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MqttCodec;

impl Codec for MqttCodec {
    fn encode(&self, packet: &Packet, version: ProtocolVersion) -> crate::Result<Bytes> {
        packet.encode(version)
    }

    fn decode(&self, buf: &[u8], version: ProtocolVersion) -> crate::Result<Option<(Packet, usize)>> {
        let Some((header, header_len)) = parse_fixed_header(buf)? else {
            return Ok(None);
        };

        let total = header_len + header.remaining_len;
        if buf.len() < total {
            return Ok(None);
        }

        let packet = Packet::decode(&header, &buf[header_len..total], version)?;
        Ok(Some((packet, total)))
    }
}
