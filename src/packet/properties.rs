use crate::packet::{
    decode,
    encode::{self, Encode},
};

const SESSION_EXPIRY_INTERVAL: u8 = 0x11;
const ASSIGNED_CLIENT_IDENTIFIER: u8 = 0x12;
const SERVER_KEEP_ALIVE: u8 = 0x13;
const REASON_STRING: u8 = 0x1F;
const RECEIVE_MAXIMUM: u8 = 0x21;
const MAXIMUM_PACKET_SIZE: u8 = 0x27;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    pub server_keep_alive: Option<u16>,
    pub assigned_client_identifier: Option<String>,
    pub reason_string: Option<String>,
}

enum Shape {
    Byte,
    TwoByte,
    FourByte,
    VariableInt,
    Utf8,
    Binary,
    Utf8Pair,
}

fn shape_of(id: u8) -> Result<Shape, crate::Error> {
    let shape = match id {
        0x01 | 0x17 | 0x19 | 0x24 | 0x25 | 0x28 | 0x29 | 0x2A => Shape::Byte,
        0x13 | 0x21 | 0x22 | 0x23 => Shape::TwoByte,
        0x02 | 0x11 | 0x18 | 0x27 => Shape::FourByte,
        0x0B => Shape::VariableInt,
        0x03 | 0x08 | 0x12 | 0x15 | 0x1A | 0x1C | 0x1F => Shape::Utf8,
        0x09 | 0x16 => Shape::Binary,
        0x26 => Shape::Utf8Pair,
        _ => return Err(crate::Error::MalformedPacket),
    };

    Ok(shape)
}

impl Properties {
    pub(crate) fn decode(cursor: &mut decode::Cursor) -> Result<Self, crate::Error> {
        let len = cursor.read_variable_int()?;
        let block = cursor.read_bytes(len)?;
        let cursor = &mut decode::Cursor::new(block);

        let mut props = Properties::default();

        while !cursor.is_empty() {
            let id = cursor.read_u8()?;

            match id {
                SESSION_EXPIRY_INTERVAL => props.session_expiry_interval = Some(cursor.read_u32()?),
                RECEIVE_MAXIMUM => props.receive_maximum = Some(cursor.read_u16()?),
                MAXIMUM_PACKET_SIZE => props.maximum_packet_size = Some(cursor.read_u32()?),
                SERVER_KEEP_ALIVE => props.server_keep_alive = Some(cursor.read_u16()?),
                ASSIGNED_CLIENT_IDENTIFIER => {
                    props.assigned_client_identifier = Some(cursor.read_utf8()?)
                }
                REASON_STRING => props.reason_string = Some(cursor.read_utf8()?),
                other => skip(cursor, shape_of(other)?)?,
            }
        }

        Ok(props)
    }

    /// Consumes a property block without keeping any of it.
    pub(crate) fn skip(cursor: &mut decode::Cursor) -> Result<(), crate::Error> {
        Self::decode(cursor).map(|_| ())
    }

    fn body_len(&self) -> usize {
        let mut len = 0;

        if self.session_expiry_interval.is_some() {
            len += 1 + 4;
        }
        if self.receive_maximum.is_some() {
            len += 1 + 2;
        }
        if self.maximum_packet_size.is_some() {
            len += 1 + 4;
        }
        if self.server_keep_alive.is_some() {
            len += 1 + 2;
        }
        if let Some(id) = &self.assigned_client_identifier {
            len += 1 + id.required_space();
        }
        if let Some(reason) = &self.reason_string {
            len += 1 + reason.required_space();
        }

        len
    }

    pub(crate) fn required_space(&self) -> usize {
        let len = self.body_len();
        encode::variable_int_len(len) + len
    }

    pub(crate) fn encode(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        encode::remaining_length(self.body_len(), cursor)?;

        if let Some(value) = self.session_expiry_interval {
            SESSION_EXPIRY_INTERVAL.encode(cursor)?;
            value.encode(cursor)?;
        }
        if let Some(value) = self.receive_maximum {
            RECEIVE_MAXIMUM.encode(cursor)?;
            value.encode(cursor)?;
        }
        if let Some(value) = self.maximum_packet_size {
            MAXIMUM_PACKET_SIZE.encode(cursor)?;
            value.encode(cursor)?;
        }
        if let Some(value) = self.server_keep_alive {
            SERVER_KEEP_ALIVE.encode(cursor)?;
            value.encode(cursor)?;
        }
        if let Some(value) = &self.assigned_client_identifier {
            ASSIGNED_CLIENT_IDENTIFIER.encode(cursor)?;
            value.encode(cursor)?;
        }
        if let Some(value) = &self.reason_string {
            REASON_STRING.encode(cursor)?;
            value.encode(cursor)?;
        }

        Ok(())
    }
}

fn skip(cursor: &mut decode::Cursor, shape: Shape) -> Result<(), crate::Error> {
    match shape {
        Shape::Byte => cursor.skip(1),
        Shape::TwoByte => cursor.skip(2),
        Shape::FourByte => cursor.skip(4),
        Shape::VariableInt => cursor.read_variable_int().map(|_| ()),
        Shape::Utf8 => cursor.read_utf8().map(|_| ()),
        Shape::Binary => cursor.read_binary().map(|_| ()),
        Shape::Utf8Pair => {
            cursor.read_utf8()?;
            cursor.read_utf8().map(|_| ())
        }
    }
}

/// Zero-length property block.
pub(crate) fn encode_empty(cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
    cursor.write_u8(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_known_and_skips_unknown() {
        let block = [
            0x0F, // property length
            0x13, 0x00, 0x1E, // server keep alive = 30
            0x26, 0x00, 0x01, b'k', 0x00, 0x01, b'v', // user property
            0x24, 0x01, // maximum qos
            0x21, 0x00, 0x0A, // receive maximum = 10
        ];
        let mut cursor = decode::Cursor::new(&block[..]);
        let props = Properties::decode(&mut cursor).unwrap();

        assert!(cursor.is_empty());
        assert_eq!(props.server_keep_alive, Some(30));
        assert_eq!(props.receive_maximum, Some(10));
        assert_eq!(props.reason_string, None);
    }

    #[test]
    fn unknown_property_id_is_malformed() {
        let block = [0x02, 0x7F, 0x00];
        let mut cursor = decode::Cursor::new(&block[..]);

        assert!(matches!(
            Properties::decode(&mut cursor),
            Err(crate::Error::MalformedPacket)
        ));
    }

    #[test]
    fn encoded_length_matches_required_space() {
        let props = Properties {
            session_expiry_interval: Some(120),
            assigned_client_identifier: Some("auto-1".to_owned()),
            ..Default::default()
        };
        let mut cursor = encode::Cursor::with_capacity(32);
        props.encode(&mut cursor).unwrap();

        assert_eq!(cursor.written().len(), props.required_space());
    }
}
