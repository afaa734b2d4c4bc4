pub mod channel;
pub mod client;
pub mod codec;
pub(crate) mod connection;
pub mod event;
pub mod inflight;
pub(crate) mod incoming;
pub(crate) mod keep_alive;
pub mod options;
pub mod packet;
pub mod parser;
pub mod protocol;
pub(crate) mod receiver;
pub mod session;
pub mod time;

pub use channel::{Channel, TcpChannel, TransportError};
pub use client::{Client, Token};
pub use codec::{Codec, MqttCodec};
pub use event::{EventHandler, Message};
pub use options::{Backoff, ClientConfig, ConnectOptions, RetryPolicy};
pub use packet::{ConnectReturnCode, PacketId, QoS, SubAckReturnCode, Will};
pub use protocol::ProtocolVersion;
pub use session::ConnectionState;
pub use time::StdClock;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("connection failed: {0}")]
    Connection(#[source] Box<Error>),

    #[error("timed out waiting for CONNACK")]
    ConnectTimeout,

    #[error("no response from server within the keep-alive interval")]
    KeepAliveTimeout,

    #[error("connection lost")]
    ConnectionLost,

    #[error("operation not allowed while {0:?}")]
    InvalidState(ConnectionState),

    #[error("packet id {0} is already in flight")]
    DuplicateId(u16),

    #[error("no in-flight record for packet id {0}")]
    UnknownId(u16),

    #[error("no packet id available")]
    NoPacketIdAvailable,

    #[error("in-flight window is full")]
    InflightWindowFull,

    #[error("client id must not be empty")]
    InvalidClientId,

    #[error("invalid topic {0:?}")]
    InvalidTopic(String),

    #[error("invalid QoS {0}")]
    InvalidQoS(u8),

    #[error("topic list is empty")]
    EmptyTopicList,

    #[error("invalid fixed header flags")]
    InvalidFlags,

    #[error("invalid packet type {0}")]
    InvalidPacketType(u8),

    #[error("malformed remaining length")]
    MalformedRemainingLength,

    #[error("malformed packet")]
    MalformedPacket,

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("invalid CONNACK return code {0}")]
    InvalidConnectReturnCode(u8),

    #[error("unsupported packet {0:?}")]
    UnsupportedPacket(protocol::PacketType),

    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: usize, max: usize },

    #[error("publish rejected with reason code {0:#04x}")]
    PublishFailed(u8),

    #[error("protocol violation")]
    ProtocolViolation,

    #[error("timed out")]
    Timeout,

    #[error("clock unavailable")]
    Clock,
}

impl Error {
    /// Errors after which the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Connection(_)
                | Self::KeepAliveTimeout
                | Self::InvalidFlags
                | Self::InvalidPacketType(_)
                | Self::MalformedRemainingLength
                | Self::MalformedPacket
                | Self::InvalidUtf8
                | Self::InvalidConnectReturnCode(_)
                | Self::InvalidQoS(_)
                | Self::UnsupportedPacket(_)
                | Self::PacketTooLarge { .. }
                | Self::ProtocolViolation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_keeps_cause_text() {
        let cause = TransportError::other(std::io::Error::other("channel error"));
        let err = Error::Connection(Box::new(Error::Transport(cause)));

        assert!(err.to_string().contains("channel error"));

        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("channel error"));
    }

    #[test]
    fn correlation_faults_are_not_fatal() {
        assert!(!Error::UnknownId(7).is_fatal());
        assert!(!Error::DuplicateId(7).is_fatal());
        assert!(!Error::Clock.is_fatal());

        assert!(Error::KeepAliveTimeout.is_fatal());
        assert!(Error::MalformedPacket.is_fatal());
        assert!(Error::Transport(TransportError::closed()).is_fatal());
    }
}
