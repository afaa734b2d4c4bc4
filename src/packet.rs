use bytes::Bytes;

use crate::{
    packet::{
        encode::{Encode, EncodePacket},
        properties::Properties,
    },
    protocol::{FixedHeader, PacketType, ProtocolVersion},
};

pub mod connect;
pub(crate) mod decode;
pub(crate) mod encode;
pub mod properties;
pub mod publish;
pub mod subscribe;
pub mod unsubscribe;

pub use connect::{ConnAck, Connect, ConnectReturnCode, Will};
pub use publish::{Flags as PublishFlags, Publish};
pub use subscribe::{SubAck, SubAckReturnCode, Subscribe, Subscription};
pub use unsubscribe::{UnsubAck, Unsubscribe};

/// A decoded MQTT control packet.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(Ack),
    PubRec(Ack),
    PubRel(Ack),
    PubComp(Ack),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnAck(_) => PacketType::ConnAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck(_) => PacketType::PubAck,
            Self::PubRec(_) => PacketType::PubRec,
            Self::PubRel(_) => PacketType::PubRel,
            Self::PubComp(_) => PacketType::PubComp,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck(_) => PacketType::SubAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubAck(_) => PacketType::UnsubAck,
            Self::PingReq => PacketType::PingReq,
            Self::PingResp => PacketType::PingResp,
            Self::Disconnect => PacketType::Disconnect,
        }
    }

    pub(crate) fn encode(&self, version: ProtocolVersion) -> Result<Bytes, crate::Error> {
        match self {
            Self::Connect(packet) => encode_packet(packet, version),
            Self::ConnAck(packet) => encode_packet(packet, version),
            Self::Publish(packet) => encode_packet(packet, version),
            Self::Subscribe(packet) => encode_packet(packet, version),
            Self::SubAck(packet) => encode_packet(packet, version),
            Self::Unsubscribe(packet) => encode_packet(packet, version),
            Self::UnsubAck(packet) => encode_packet(packet, version),
            Self::PubAck(ack) => ack.encode(PacketType::PubAck, version),
            Self::PubRec(ack) => ack.encode(PacketType::PubRec, version),
            Self::PubRel(ack) => ack.encode(PacketType::PubRel, version),
            Self::PubComp(ack) => ack.encode(PacketType::PubComp, version),
            Self::PingReq => Ok(empty_body(PacketType::PingReq)),
            Self::PingResp => Ok(empty_body(PacketType::PingResp)),
            Self::Disconnect => Ok(empty_body(PacketType::Disconnect)),
        }
    }

    pub(crate) fn decode(
        header: &FixedHeader,
        body: &[u8],
        version: ProtocolVersion,
    ) -> Result<Self, crate::Error> {
        if header.remaining_len != body.len() {
            return Err(crate::Error::MalformedRemainingLength);
        }

        let cursor = &mut decode::Cursor::new(body);
        let flags = header.flags;

        let packet = match header.packet_type {
            PacketType::Connect => Connect::decode(cursor, version).map(Packet::Connect)?,
            PacketType::ConnAck => ConnAck::decode(cursor, version).map(Packet::ConnAck)?,
            PacketType::Publish => Publish::decode(cursor, flags, version).map(Packet::Publish)?,
            PacketType::PubAck => Ack::decode(cursor, version).map(Packet::PubAck)?,
            PacketType::PubRec => Ack::decode(cursor, version).map(Packet::PubRec)?,
            PacketType::PubRel => Ack::decode(cursor, version).map(Packet::PubRel)?,
            PacketType::PubComp => Ack::decode(cursor, version).map(Packet::PubComp)?,
            PacketType::Subscribe => {
                Subscribe::decode(cursor, version).map(Packet::Subscribe)?
            }
            PacketType::SubAck => SubAck::decode(cursor, version).map(Packet::SubAck)?,
            PacketType::Unsubscribe => {
                Unsubscribe::decode(cursor, version).map(Packet::Unsubscribe)?
            }
            PacketType::UnsubAck => UnsubAck::decode(cursor, version).map(Packet::UnsubAck)?,
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => {
                if version.has_properties() && !cursor.is_empty() {
                    // reason code, then optional properties
                    cursor.read_u8()?;
                    if !cursor.is_empty() {
                        Properties::skip(cursor)?;
                    }
                }
                Packet::Disconnect
            }
            PacketType::Auth => return Err(crate::Error::UnsupportedPacket(PacketType::Auth)),
        };

        cursor.expect_empty()?;
        Ok(packet)
    }
}

fn encode_packet<P: EncodePacket>(
    packet: &P,
    version: ProtocolVersion,
) -> Result<Bytes, crate::Error> {
    let body_len = packet.required_space(version);
    let mut cursor = encode::Cursor::with_capacity(body_len + 5);

    let header = ((P::PACKET_TYPE as u8) << 4) | (packet.flags() & 0x0F);
    cursor.write_u8(header)?;
    encode::remaining_length(body_len, &mut cursor)?;

    packet.encode_body(&mut cursor, version)?;
    Ok(cursor.freeze())
}

fn empty_body(packet_type: PacketType) -> Bytes {
    let header = ((packet_type as u8) << 4) | packet_type.fixed_flags();
    Bytes::from(vec![header, 0])
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let qos = match value {
            0 => Self::AtMostOnce,
            1 => Self::AtLeastOnce,
            2 => Self::ExactlyOnce,
            _ => return Err(crate::Error::InvalidQoS(value)),
        };

        Ok(qos)
    }
}

impl encode::Encode for QoS {
    fn encode(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        (*self as u8).encode(cursor)
    }

    fn required_space(&self) -> usize {
        1
    }
}

/// Non-zero packet identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketId(u16);

impl PacketId {
    pub const fn new(id: u16) -> Option<Self> {
        if id == 0 { None } else { Some(Self(id)) }
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    fn decode(cursor: &mut decode::Cursor) -> Result<Self, crate::Error> {
        Self::try_from(cursor.read_u16()?)
    }
}

impl TryFrom<u16> for PacketId {
    type Error = crate::Error;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::new(id).ok_or(crate::Error::MalformedPacket)
    }
}

impl core::fmt::Display for PacketId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

impl encode::Encode for PacketId {
    fn encode(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        self.0.encode(cursor)
    }

    fn required_space(&self) -> usize {
        2
    }
}

/// Body shared by PUBACK, PUBREC, PUBREL and PUBCOMP.
///
/// `reason_code` is only carried on the wire for MQTT 5; earlier revisions
/// always decode it as `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ack {
    pub packet_id: PacketId,
    pub reason_code: u8,
}

impl Ack {
    pub const fn new(packet_id: PacketId) -> Self {
        Self {
            packet_id,
            reason_code: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.reason_code >= 0x80
    }

    fn decode(cursor: &mut decode::Cursor, version: ProtocolVersion) -> Result<Self, crate::Error> {
        let packet_id = PacketId::decode(cursor)?;
        let mut reason_code = 0;

        if version.has_properties() && !cursor.is_empty() {
            reason_code = cursor.read_u8()?;

            if !cursor.is_empty() {
                Properties::skip(cursor)?;
            }
        }

        Ok(Self {
            packet_id,
            reason_code,
        })
    }

    fn encode(&self, packet_type: PacketType, version: ProtocolVersion) -> Result<Bytes, crate::Error> {
        let with_reason = version.has_properties() && self.reason_code != 0;
        let body_len = if with_reason { 3 } else { 2 };

        let mut cursor = encode::Cursor::with_capacity(body_len + 2);
        cursor.write_u8(((packet_type as u8) << 4) | packet_type.fixed_flags())?;
        encode::remaining_length(body_len, &mut cursor)?;
        self.packet_id.encode(&mut cursor)?;

        if with_reason {
            self.reason_code.encode(&mut cursor)?;
        }

        Ok(cursor.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &[u8]) -> (FixedHeader, &[u8]) {
        let (header, header_len) = crate::parser::parse_fixed_header(bytes)
            .unwrap()
            .expect("complete header");
        (header, &bytes[header_len..])
    }

    #[test]
    fn pingreq_is_two_bytes() {
        let bytes = Packet::PingReq.encode(ProtocolVersion::V311).unwrap();
        assert_eq!(&bytes[..], &[0xC0, 0x00]);
    }

    #[test]
    fn pubrel_carries_reserved_flags() {
        let ack = Ack::new(PacketId::new(10).unwrap());
        let bytes = Packet::PubRel(ack).encode(ProtocolVersion::V311).unwrap();

        assert_eq!(&bytes[..], &[0x62, 0x02, 0x00, 0x0A]);
    }

    #[test]
    fn v5_ack_with_reason_and_properties() {
        let bytes = [0x40, 0x04, 0x00, 0x07, 0x87, 0x00];
        let (header, body) = frame(&bytes);
        let packet = Packet::decode(&header, body, ProtocolVersion::V5).unwrap();

        match packet {
            Packet::PubAck(ack) => {
                assert_eq!(ack.packet_id.get(), 7);
                assert!(ack.is_failure());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn v311_ack_with_trailing_bytes_is_malformed() {
        let bytes = [0x40, 0x03, 0x00, 0x07, 0x00];
        let (header, body) = frame(&bytes);

        assert!(matches!(
            Packet::decode(&header, body, ProtocolVersion::V311),
            Err(crate::Error::MalformedPacket)
        ));
    }

    #[test]
    fn zero_packet_id_is_malformed() {
        let bytes = [0x40, 0x02, 0x00, 0x00];
        let (header, body) = frame(&bytes);

        assert!(Packet::decode(&header, body, ProtocolVersion::V311).is_err());
    }

    #[test]
    fn auth_is_unsupported() {
        let bytes = [0xF0, 0x00];
        let (header, body) = frame(&bytes);

        assert!(matches!(
            Packet::decode(&header, body, ProtocolVersion::V5),
            Err(crate::Error::UnsupportedPacket(PacketType::Auth))
        ));
    }

    #[test]
    fn qos_range() {
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(QoS::try_from(3), Err(crate::Error::InvalidQoS(3))));
    }
}
