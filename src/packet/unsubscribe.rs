use crate::{
    packet::{
        PacketId, decode,
        encode::{self, Encode},
        properties::{self, Properties},
    },
    protocol::{PacketType, ProtocolVersion},
};

#[derive(Clone, Debug, PartialEq)]
pub struct Unsubscribe {
    pub packet_id: PacketId,
    pub topics: Vec<String>,
}

impl Unsubscribe {
    pub(crate) fn decode(
        cursor: &mut decode::Cursor,
        version: ProtocolVersion,
    ) -> Result<Self, crate::Error> {
        let packet_id = PacketId::decode(cursor)?;

        if version.has_properties() {
            Properties::skip(cursor)?;
        }

        let mut topics = Vec::new();

        while !cursor.is_empty() {
            topics.push(cursor.read_utf8()?);
        }

        if topics.is_empty() {
            return Err(crate::Error::MalformedPacket);
        }

        Ok(Unsubscribe { packet_id, topics })
    }
}

impl encode::EncodePacket for Unsubscribe {
    const PACKET_TYPE: PacketType = PacketType::Unsubscribe;

    fn flags(&self) -> u8 {
        0b0010
    }

    fn required_space(&self, version: ProtocolVersion) -> usize {
        let mut required = self.packet_id.required_space();

        if version.has_properties() {
            required += 1;
        }

        for topic in &self.topics {
            required += topic.required_space();
        }

        required
    }

    fn encode_body(
        &self,
        cursor: &mut encode::Cursor,
        version: ProtocolVersion,
    ) -> Result<(), crate::Error> {
        self.packet_id.encode(cursor)?;

        if version.has_properties() {
            properties::encode_empty(cursor)?;
        }

        for topic in &self.topics {
            topic.encode(cursor)?;
        }

        Ok(())
    }
}

/// UNSUBACK. MQTT 3 carries only the packet id, so `reason_codes` is empty
/// for those revisions.
#[derive(Clone, Debug, PartialEq)]
pub struct UnsubAck {
    pub packet_id: PacketId,
    pub reason_codes: Vec<u8>,
}

impl UnsubAck {
    pub(crate) fn decode(
        cursor: &mut decode::Cursor,
        version: ProtocolVersion,
    ) -> Result<Self, crate::Error> {
        let packet_id = PacketId::decode(cursor)?;
        let mut reason_codes = Vec::new();

        if version.has_properties() {
            Properties::skip(cursor)?;

            while !cursor.is_empty() {
                reason_codes.push(cursor.read_u8()?);
            }
        }

        Ok(UnsubAck {
            packet_id,
            reason_codes,
        })
    }
}

impl encode::EncodePacket for UnsubAck {
    const PACKET_TYPE: PacketType = PacketType::UnsubAck;

    fn flags(&self) -> u8 {
        0
    }

    fn required_space(&self, version: ProtocolVersion) -> usize {
        if version.has_properties() {
            self.packet_id.required_space() + 1 + self.reason_codes.len()
        } else {
            self.packet_id.required_space()
        }
    }

    fn encode_body(
        &self,
        cursor: &mut encode::Cursor,
        version: ProtocolVersion,
    ) -> Result<(), crate::Error> {
        self.packet_id.encode(cursor)?;

        if version.has_properties() {
            properties::encode_empty(cursor)?;
            cursor.write_bytes(&self.reason_codes)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubscribe_needs_a_topic() {
        let body = [0x00, 0x01];
        let mut cursor = decode::Cursor::new(&body);

        assert!(Unsubscribe::decode(&mut cursor, ProtocolVersion::V311).is_err());
    }

    #[test]
    fn unsuback_v5_reason_codes() {
        let body = [0x00, 0x03, 0x00, 0x00, 0x11];
        let mut cursor = decode::Cursor::new(&body);
        let packet = UnsubAck::decode(&mut cursor, ProtocolVersion::V5).unwrap();

        assert_eq!(packet.packet_id.get(), 3);
        assert_eq!(packet.reason_codes, vec![0x00, 0x11]);
    }
}
