use bytes::Bytes;

use crate::packet::{PacketId, Publish, QoS};

/// An application message received from the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<PacketId>,
}

impl From<&Publish> for Message {
    fn from(publish: &Publish) -> Self {
        Self {
            topic: publish.topic.clone(),
            payload: publish.payload.clone(),
            qos: publish.flags.qos,
            retain: publish.flags.retain,
            dup: publish.flags.dup,
            packet_id: publish.packet_id,
        }
    }
}

/// Receives client events.
///
/// Called from the client's background tasks in wire order, so
/// implementations must not block.
pub trait EventHandler: Send + Sync {
    fn on_message(&self, _message: &Message) {}

    /// The connection dropped without a local `disconnect`.
    fn on_connection_lost(&self, _cause: &crate::Error) {}

    /// A QoS 1/2 publish was fully acknowledged.
    fn on_delivery_complete(&self, _packet_id: PacketId) {}

    /// A publish went unacknowledged for `RetryPolicy::max_attempts` sends.
    /// Resending continues.
    fn on_delivery_degraded(&self, _packet_id: PacketId, _attempts: u32) {}
}

pub(crate) struct NoopHandler;

impl EventHandler for NoopHandler {}
