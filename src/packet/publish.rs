use bytes::Bytes;

use crate::{
    packet::{
        PacketId, QoS, decode,
        encode::{self, Encode},
        properties::{self, Properties},
    },
    protocol::{PacketType, ProtocolVersion},
};

#[derive(Clone, Debug, PartialEq)]
pub struct Publish {
    pub flags: Flags,
    pub topic: String,
    pub packet_id: Option<PacketId>,
    pub payload: Bytes,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
}

impl TryFrom<u8> for Flags {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let dup = value & 0b1000 != 0;
        let qos = QoS::try_from((value >> 1) & 0b11)?;
        let retain = value & 0b0001 != 0;

        Ok(Self { dup, qos, retain })
    }
}

impl From<&Flags> for u8 {
    fn from(value: &Flags) -> Self {
        (value.dup as u8) << 3 | (value.qos as u8) << 1 | (value.retain as u8)
    }
}

impl Publish {
    pub(crate) fn decode(
        cursor: &mut decode::Cursor,
        flags: u8,
        version: ProtocolVersion,
    ) -> Result<Self, crate::Error> {
        let flags = Flags::try_from(flags)?;

        // a QoS 0 message must not be flagged as a redelivery
        if flags.dup && flags.qos == QoS::AtMostOnce {
            return Err(crate::Error::MalformedPacket);
        }

        let topic = cursor.read_utf8()?;
        if topic.contains(['+', '#']) {
            return Err(crate::Error::MalformedPacket);
        }

        let packet_id = if let QoS::AtMostOnce = flags.qos {
            None
        } else {
            Some(PacketId::decode(cursor)?)
        };

        if version.has_properties() {
            Properties::skip(cursor)?;
        }

        let payload = cursor.read_all();

        Ok(Publish {
            flags,
            topic,
            packet_id,
            payload,
        })
    }
}

impl encode::EncodePacket for Publish {
    const PACKET_TYPE: PacketType = PacketType::Publish;

    fn encode_body(
        &self,
        cursor: &mut encode::Cursor,
        version: ProtocolVersion,
    ) -> Result<(), crate::Error> {
        self.topic.encode(cursor)?;

        match (self.flags.qos, self.packet_id) {
            (QoS::AtMostOnce, None) => {}
            (QoS::AtMostOnce, Some(_)) | (_, None) => return Err(crate::Error::MalformedPacket),
            (_, Some(id)) => id.encode(cursor)?,
        }

        if version.has_properties() {
            properties::encode_empty(cursor)?;
        }

        cursor.write_bytes(&self.payload)
    }

    fn flags(&self) -> u8 {
        (&self.flags).into()
    }

    fn required_space(&self, version: ProtocolVersion) -> usize {
        self.topic.required_space()
            + self.packet_id.map(|id| id.required_space()).unwrap_or(0)
            + if version.has_properties() { 1 } else { 0 }
            + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_packet() {
        let flags = 0b0000_0000;
        let body = [
            0x00, 0x05, b't', b'o', b'p', b'i', b'c', b'p', b'a', b'y', b'l', b'o', b'a', b'd',
        ];
        let mut cursor = decode::Cursor::new(&body);
        let packet = Publish::decode(&mut cursor, flags, ProtocolVersion::V311).unwrap();

        assert!(matches!(
            packet.flags,
            Flags {
                dup: false,
                qos: QoS::AtMostOnce,
                retain: false
            }
        ));
        assert_eq!(packet.packet_id, None);
        assert_eq!(packet.topic, "topic");
        assert_eq!(&packet.payload[..], b"payload");
    }

    #[test]
    fn flags_bits() {
        let flags = Flags::try_from(0b1011).unwrap();

        assert!(flags.dup);
        assert_eq!(flags.qos, QoS::AtLeastOnce);
        assert!(flags.retain);
        assert_eq!(u8::from(&flags), 0b1011);
    }

    #[test]
    fn qos3_is_rejected() {
        assert!(matches!(
            Flags::try_from(0b0110),
            Err(crate::Error::InvalidQoS(3))
        ));
    }

    #[test]
    fn qos1_requires_packet_id() {
        let body = [0x00, 0x01, b't', 0x00, 0x00];
        let mut cursor = decode::Cursor::new(&body);

        assert!(Publish::decode(&mut cursor, 0b0010, ProtocolVersion::V311).is_err());
    }

    #[test]
    fn wildcard_topic_is_rejected() {
        let body = [0x00, 0x03, b'a', b'/', b'#'];
        let mut cursor = decode::Cursor::new(&body);

        assert!(Publish::decode(&mut cursor, 0, ProtocolVersion::V311).is_err());
    }

    #[test]
    fn encode_without_packet_id_for_qos1_fails() {
        use crate::packet::encode::EncodePacket;

        let publish = Publish {
            flags: Flags {
                qos: QoS::AtLeastOnce,
                ..Default::default()
            },
            topic: "t".to_owned(),
            packet_id: None,
            payload: Bytes::new(),
        };
        let mut cursor = encode::Cursor::with_capacity(8);

        assert!(
            publish
                .encode_body(&mut cursor, ProtocolVersion::V311)
                .is_err()
        );
    }
}
