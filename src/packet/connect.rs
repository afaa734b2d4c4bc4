use bytes::Bytes;

use crate::{
    packet::{
        QoS, decode,
        encode::{self, Encode},
        properties::{self, Properties},
    },
    protocol::{PacketType, ProtocolVersion},
};

#[derive(Clone, Debug, PartialEq)]
pub struct Connect {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    /// Sent only for MQTT 5.
    pub properties: Properties,
}

/// Last-will message the broker publishes if the session ends abnormally.
#[derive(Clone, Debug, PartialEq)]
pub struct Will {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub payload: Bytes,
}

impl Connect {
    pub(crate) fn decode(
        cursor: &mut decode::Cursor,
        version: ProtocolVersion,
    ) -> Result<Self, crate::Error> {
        let protocol_name = cursor.read_utf8()?;
        if protocol_name != version.protocol_name() {
            return Err(crate::Error::MalformedPacket);
        }

        let level = cursor.read_u8()?;
        if level != version.level() {
            return Err(crate::Error::MalformedPacket);
        }

        let flags = cursor.read_u8()?;
        if flags & 0b0000_0001 != 0 {
            return Err(crate::Error::MalformedPacket);
        }

        let clean_session = flags & 0b0000_0010 != 0;
        let will_flag = flags & 0b0000_0100 != 0;
        let qos = QoS::try_from((flags >> 3) & 0b11)?;
        let retain = flags & 0b0010_0000 != 0;
        let password_flag = flags & 0b0100_0000 != 0;
        let username_flag = flags & 0b1000_0000 != 0;

        if !will_flag && (retain || qos != QoS::AtMostOnce) {
            return Err(crate::Error::MalformedPacket);
        }

        let keep_alive = cursor.read_u16()?;

        let properties = if version.has_properties() {
            Properties::decode(cursor)?
        } else {
            Properties::default()
        };

        let client_id = cursor.read_utf8()?;

        let will = if will_flag {
            if version.has_properties() {
                Properties::skip(cursor)?;
            }

            Some(Will {
                topic: cursor.read_utf8()?,
                payload: cursor.read_binary()?,
                qos,
                retain,
            })
        } else {
            None
        };

        let username = if username_flag {
            Some(cursor.read_utf8()?)
        } else {
            None
        };

        let password = if password_flag {
            Some(cursor.read_binary()?)
        } else {
            None
        };

        Ok(Connect {
            clean_session,
            keep_alive,
            client_id,
            will,
            username,
            password,
            properties,
        })
    }

    fn connect_flags(&self) -> u8 {
        (self.username.is_some() as u8) << 7
            | (self.password.is_some() as u8) << 6
            | (self.will.as_ref().map(|w| w.retain).unwrap_or(false) as u8) << 5
            | self.will.as_ref().map(|w| w.qos as u8).unwrap_or(0) << 3 // 2 bits
            | (self.will.is_some() as u8) << 2
            | (self.clean_session as u8) << 1
    }
}

impl encode::EncodePacket for Connect {
    const PACKET_TYPE: PacketType = PacketType::Connect;

    fn flags(&self) -> u8 {
        0
    }

    fn required_space(&self, version: ProtocolVersion) -> usize {
        let mut required = version.protocol_name().required_space()
            + version.level().required_space()
            + self.connect_flags().required_space()
            + self.keep_alive.required_space()
            + self.client_id.required_space();

        if version.has_properties() {
            required += self.properties.required_space();
        }

        if let Some(will) = &self.will {
            if version.has_properties() {
                required += 1;
            }
            required += will.topic.required_space();
            required += will.payload.required_space();
        }

        if let Some(username) = &self.username {
            required += username.required_space();
        }

        if let Some(password) = &self.password {
            required += password.required_space();
        }

        required
    }

    fn encode_body(
        &self,
        cursor: &mut encode::Cursor,
        version: ProtocolVersion,
    ) -> Result<(), crate::Error> {
        version.protocol_name().encode(cursor)?;
        version.level().encode(cursor)?;
        self.connect_flags().encode(cursor)?;
        self.keep_alive.encode(cursor)?;

        if version.has_properties() {
            self.properties.encode(cursor)?;
        }

        self.client_id.encode(cursor)?;

        if let Some(will) = &self.will {
            if version.has_properties() {
                properties::encode_empty(cursor)?;
            }
            will.topic.encode(cursor)?;
            will.payload.encode(cursor)?;
        }

        if let Some(username) = &self.username {
            username.encode(cursor)?;
        }

        if let Some(password) = &self.password {
            password.encode(cursor)?;
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
    /// Sent only for MQTT 5.
    pub properties: Properties,
}

impl ConnAck {
    pub(crate) fn decode(
        cursor: &mut decode::Cursor,
        version: ProtocolVersion,
    ) -> Result<Self, crate::Error> {
        let flags = cursor.read_u8()?;

        if flags & 0b1111_1110 != 0 {
            return Err(crate::Error::MalformedPacket);
        }

        let code = cursor.read_u8()?;
        let return_code = if version.has_properties() {
            ConnectReturnCode::from_reason_code(code)?
        } else {
            ConnectReturnCode::try_from(code)?
        };

        let session_present = (flags & 0b0000_0001) != 0;

        if return_code != ConnectReturnCode::Accepted && session_present {
            return Err(crate::Error::MalformedPacket);
        }

        let properties = if version.has_properties() && !cursor.is_empty() {
            Properties::decode(cursor)?
        } else {
            Properties::default()
        };

        Ok(ConnAck {
            session_present,
            return_code,
            properties,
        })
    }
}

impl encode::EncodePacket for ConnAck {
    const PACKET_TYPE: PacketType = PacketType::ConnAck;

    fn flags(&self) -> u8 {
        0
    }

    fn required_space(&self, version: ProtocolVersion) -> usize {
        if version.has_properties() {
            2 + self.properties.required_space()
        } else {
            2
        }
    }

    fn encode_body(
        &self,
        cursor: &mut encode::Cursor,
        version: ProtocolVersion,
    ) -> Result<(), crate::Error> {
        (self.session_present as u8).encode(cursor)?;

        if version.has_properties() {
            self.return_code.reason_code().encode(cursor)?;
            self.properties.encode(cursor)
        } else {
            self.return_code.v3_code()?.encode(cursor)
        }
    }
}

/// Outcome of the CONNECT handshake as reported by CONNACK.
///
/// Anything other than [`ConnectReturnCode::Accepted`] is a refusal; refusals
/// are ordinary results, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
    /// MQTT 5 failure reason without an MQTT 3 equivalent.
    Refused(u8),
}

impl ConnectReturnCode {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Maps an MQTT 5 CONNACK reason code.
    pub(crate) fn from_reason_code(code: u8) -> Result<Self, crate::Error> {
        let res = match code {
            0x00 => Self::Accepted,
            0x84 => Self::UnacceptableProtocolVersion,
            0x85 => Self::IdentifierRejected,
            0x86 => Self::BadUserNameOrPassword,
            0x87 => Self::NotAuthorized,
            0x88 => Self::ServerUnavailable,
            0x80..=0xFF => Self::Refused(code),
            _ => return Err(crate::Error::InvalidConnectReturnCode(code)),
        };

        Ok(res)
    }

    pub(crate) fn reason_code(&self) -> u8 {
        match self {
            Self::Accepted => 0x00,
            Self::UnacceptableProtocolVersion => 0x84,
            Self::IdentifierRejected => 0x85,
            Self::BadUserNameOrPassword => 0x86,
            Self::NotAuthorized => 0x87,
            Self::ServerUnavailable => 0x88,
            Self::Refused(code) => *code,
        }
    }

    fn v3_code(&self) -> Result<u8, crate::Error> {
        let code = match self {
            Self::Accepted => 0,
            Self::UnacceptableProtocolVersion => 1,
            Self::IdentifierRejected => 2,
            Self::ServerUnavailable => 3,
            Self::BadUserNameOrPassword => 4,
            Self::NotAuthorized => 5,
            Self::Refused(code) => return Err(crate::Error::InvalidConnectReturnCode(*code)),
        };

        Ok(code)
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => return Err(crate::Error::InvalidConnectReturnCode(value)),
        };

        Ok(code)
    }
}
