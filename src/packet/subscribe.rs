use crate::{
    packet::{
        PacketId, QoS, decode,
        encode::{self, Encode},
        properties::{self, Properties},
    },
    protocol::{PacketType, ProtocolVersion},
};

#[derive(Clone, Debug, PartialEq)]
pub struct Subscribe {
    pub packet_id: PacketId,
    pub topics: Vec<Subscription>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: QoS,
}

impl Subscribe {
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
            let topic_filter = cursor.read_utf8()?;
            let options = cursor.read_u8()?;

            // MQTT 3 reserves everything above the QoS bits, MQTT 5 only the top two
            let reserved = if version.has_properties() {
                0b1100_0000
            } else {
                0b1111_1100
            };
            if options & reserved != 0 {
                return Err(crate::Error::MalformedPacket);
            }

            let qos = QoS::try_from(options & 0b11)?;
            topics.push(Subscription { topic_filter, qos });
        }

        if topics.is_empty() {
            return Err(crate::Error::MalformedPacket);
        }

        Ok(Subscribe { packet_id, topics })
    }
}

impl encode::EncodePacket for Subscribe {
    const PACKET_TYPE: PacketType = PacketType::Subscribe;

    fn flags(&self) -> u8 {
        0b0010
    }

    fn required_space(&self, version: ProtocolVersion) -> usize {
        let mut required = self.packet_id.required_space();

        if version.has_properties() {
            required += 1;
        }

        for sub in &self.topics {
            required += sub.topic_filter.required_space() + sub.qos.required_space();
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

        for sub in &self.topics {
            sub.topic_filter.encode(cursor)?;
            sub.qos.encode(cursor)?;
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubAck {
    pub packet_id: PacketId,
    pub return_codes: Vec<SubAckReturnCode>,
}

/// Per-filter result of a SUBSCRIBE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubAckReturnCode {
    Granted(QoS),
    /// `0x80` for MQTT 3, any MQTT 5 failure reason otherwise.
    Failure(u8),
}

impl SubAckReturnCode {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    fn decode(code: u8, version: ProtocolVersion) -> Result<Self, crate::Error> {
        match code {
            0..=2 => Ok(Self::Granted(QoS::try_from(code)?)),
            0x80 => Ok(Self::Failure(code)),
            0x81..=0xFF if version.has_properties() => Ok(Self::Failure(code)),
            _ => Err(crate::Error::MalformedPacket),
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::Granted(qos) => *qos as u8,
            Self::Failure(code) => *code,
        }
    }
}

impl SubAck {
    pub(crate) fn decode(
        cursor: &mut decode::Cursor,
        version: ProtocolVersion,
    ) -> Result<Self, crate::Error> {
        let packet_id = PacketId::decode(cursor)?;

        if version.has_properties() {
            Properties::skip(cursor)?;
        }

        let mut return_codes = Vec::with_capacity(cursor.remaining());

        while !cursor.is_empty() {
            return_codes.push(SubAckReturnCode::decode(cursor.read_u8()?, version)?);
        }

        if return_codes.is_empty() {
            return Err(crate::Error::MalformedPacket);
        }

        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}

impl encode::EncodePacket for SubAck {
    const PACKET_TYPE: PacketType = PacketType::SubAck;

    fn flags(&self) -> u8 {
        0
    }

    fn required_space(&self, version: ProtocolVersion) -> usize {
        let props = if version.has_properties() { 1 } else { 0 };
        self.packet_id.required_space() + props + self.return_codes.len()
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

        for code in &self.return_codes {
            code.code().encode(cursor)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suback_mixed_codes() {
        let body = [0x00, 0x0A, 0x01, 0x80, 0x02];
        let mut cursor = decode::Cursor::new(&body);
        let packet = SubAck::decode(&mut cursor, ProtocolVersion::V311).unwrap();

        assert_eq!(packet.packet_id.get(), 10);
        assert_eq!(
            packet.return_codes,
            vec![
                SubAckReturnCode::Granted(QoS::AtLeastOnce),
                SubAckReturnCode::Failure(0x80),
                SubAckReturnCode::Granted(QoS::ExactlyOnce),
            ]
        );
    }

    #[test]
    fn suback_without_codes_is_malformed() {
        let body = [0x00, 0x0A];
        let mut cursor = decode::Cursor::new(&body);

        assert!(SubAck::decode(&mut cursor, ProtocolVersion::V311).is_err());
    }

    #[test]
    fn v311_rejects_v5_failure_codes() {
        let body = [0x00, 0x0A, 0x87];
        let mut cursor = decode::Cursor::new(&body);

        assert!(SubAck::decode(&mut cursor, ProtocolVersion::V311).is_err());

        let body = [0x00, 0x0A, 0x00, 0x87];
        let mut cursor = decode::Cursor::new(&body);
        let packet = SubAck::decode(&mut cursor, ProtocolVersion::V5).unwrap();
        assert!(packet.return_codes[0].is_failure());
    }

    #[test]
    fn subscribe_reserved_option_bits() {
        let body = [0x00, 0x01, 0x00, 0x01, b'a', 0b0000_0101];
        let mut cursor = decode::Cursor::new(&body);

        assert!(Subscribe::decode(&mut cursor, ProtocolVersion::V311).is_err());
    }
}
