use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use embedded_time::Clock;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{
    channel::Channel,
    codec::{Codec, MqttCodec},
    connection::Shared,
    event::EventHandler,
    inflight,
    options::{ClientConfig, ConnectOptions},
    packet::{
        ConnectReturnCode, Packet, PacketId, Publish, PublishFlags, QoS, SubAckReturnCode,
        Subscribe, Subscription, Unsubscribe,
    },
    session::ConnectionState,
    time::StdClock,
};

/// MQTT client over a [`Channel`].
///
/// All methods take `&self` and may be called concurrently; wrap the client
/// in an `Arc` to share it between tasks.
pub struct Client<C, K = StdClock>
where
    C: Channel,
    K: Clock<T = u64> + Send + Sync + 'static,
{
    shared: Arc<Shared<C, K>>,
}

impl<C: Channel> Client<C> {
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, ClientConfig::default())
    }

    pub fn with_config(channel: C, config: ClientConfig) -> Self {
        Self::with_parts(channel, Arc::new(MqttCodec), config, StdClock::default())
    }
}

impl<C, K> Client<C, K>
where
    C: Channel,
    K: Clock<T = u64> + Send + Sync + 'static,
{
    pub fn with_parts(channel: C, codec: Arc<dyn Codec>, config: ClientConfig, clock: K) -> Self {
        Self {
            shared: Arc::new(Shared::new(channel, codec, config, clock)),
        }
    }

    /// Opens the channel and performs the CONNECT/CONNACK handshake.
    ///
    /// A refusal by the broker is returned as `Ok` with the refusal code.
    /// Transport failures, malformed responses and timeouts are errors. In
    /// both cases the client is back in [`ConnectionState::Disconnected`] and
    /// no longer reads from the channel when this returns.
    pub async fn connect(&self, options: ConnectOptions) -> crate::Result<ConnectReturnCode> {
        if options.client_id.is_empty() {
            return Err(crate::Error::InvalidClientId);
        }
        if let Some(will) = &options.will {
            validate_topic_name(&will.topic)?;
        }

        self.shared.connect(&options).await
    }

    /// Publishes a message.
    ///
    /// QoS 0 tokens are complete as soon as the packet is written. QoS 1/2
    /// tokens resolve on PUBACK / PUBCOMP, or fail with
    /// [`crate::Error::ConnectionLost`] if the connection ends first.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> crate::Result<Token<()>> {
        validate_topic_name(topic)?;
        self.ensure_connected()?;

        let mut publish = Publish {
            flags: PublishFlags {
                dup: false,
                qos,
                retain,
            },
            topic: topic.to_owned(),
            packet_id: None,
            payload: payload.into(),
        };

        let Some(kind) = inflight::initial_kind(qos) else {
            self.shared.send(&Packet::Publish(publish)).await?;
            return Ok(Token::ready(None, ()));
        };

        let (tx, rx) = oneshot::channel();
        let now = self.shared.now()?;
        let packet_id = {
            let mut tracker = self.shared.tracker.lock();
            let packet_id = tracker.allocate_id()?;
            publish.packet_id = Some(packet_id);
            tracker.track_outbound(packet_id, kind, publish.clone(), now, Some(tx))?;
            packet_id
        };

        debug!(packet_id = packet_id.get(), topic, ?qos, "publish");
        self.send_tracked(packet_id, Packet::Publish(publish)).await?;

        Ok(Token::pending(packet_id, rx))
    }

    /// Subscribes to `(filter, qos)` pairs. The token yields one return code
    /// per filter, in order.
    pub async fn subscribe(
        &self,
        topics: &[(&str, QoS)],
    ) -> crate::Result<Token<Vec<SubAckReturnCode>>> {
        if topics.is_empty() {
            return Err(crate::Error::EmptyTopicList);
        }
        for (filter, _) in topics {
            validate_topic_filter(filter)?;
        }
        self.ensure_connected()?;

        let (tx, rx) = oneshot::channel();
        let packet_id = {
            let mut tracker = self.shared.tracker.lock();
            let packet_id = tracker.allocate_id()?;
            tracker.track_subscribe(packet_id, tx)?;
            packet_id
        };

        let subscribe = Subscribe {
            packet_id,
            topics: topics
                .iter()
                .map(|(filter, qos)| Subscription {
                    topic_filter: (*filter).to_owned(),
                    qos: *qos,
                })
                .collect(),
        };

        debug!(packet_id = packet_id.get(), filters = topics.len(), "subscribe");
        self.send_tracked(packet_id, Packet::Subscribe(subscribe)).await?;

        Ok(Token::pending(packet_id, rx))
    }

    /// Unsubscribes from `topics`. The token yields the MQTT 5 reason codes,
    /// empty for earlier protocol versions.
    pub async fn unsubscribe(&self, topics: &[&str]) -> crate::Result<Token<Vec<u8>>> {
        if topics.is_empty() {
            return Err(crate::Error::EmptyTopicList);
        }
        for filter in topics {
            validate_topic_filter(filter)?;
        }
        self.ensure_connected()?;

        let (tx, rx) = oneshot::channel();
        let packet_id = {
            let mut tracker = self.shared.tracker.lock();
            let packet_id = tracker.allocate_id()?;
            tracker.track_unsubscribe(packet_id, tx)?;
            packet_id
        };

        let unsubscribe = Unsubscribe {
            packet_id,
            topics: topics.iter().map(|t| (*t).to_owned()).collect(),
        };

        self.send_tracked(packet_id, Packet::Unsubscribe(unsubscribe))
            .await?;

        Ok(Token::pending(packet_id, rx))
    }

    /// Sends DISCONNECT and closes the channel. Does nothing when not
    /// connected.
    pub async fn disconnect(&self) {
        self.shared.disconnect().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether the broker resumed a stored session on the last connect.
    pub fn session_present(&self) -> bool {
        self.shared.session.lock().session_present()
    }

    pub fn set_handler(&self, handler: impl EventHandler + 'static) {
        *self.shared.handler.write() = Arc::new(handler);
    }

    fn ensure_connected(&self) -> crate::Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            state => Err(crate::Error::InvalidState(state)),
        }
    }

    async fn send_tracked(&self, packet_id: PacketId, packet: Packet) -> crate::Result<()> {
        let sent = self.shared.send(&packet).await;
        if sent.is_err() {
            self.shared.tracker.lock().forget(packet_id);
        }
        sent
    }
}

impl<C, K> Drop for Client<C, K>
where
    C: Channel,
    K: Clock<T = u64> + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shared.abort_tasks();
    }
}

/// Completion handle for an operation acknowledged by the broker.
#[derive(Debug)]
pub struct Token<T> {
    packet_id: Option<PacketId>,
    outcome: Outcome<T>,
}

#[derive(Debug)]
enum Outcome<T> {
    Ready(T),
    Pending(oneshot::Receiver<crate::Result<T>>),
}

impl<T> Token<T> {
    fn ready(packet_id: Option<PacketId>, value: T) -> Self {
        Self {
            packet_id,
            outcome: Outcome::Ready(value),
        }
    }

    fn pending(packet_id: PacketId, rx: oneshot::Receiver<crate::Result<T>>) -> Self {
        Self {
            packet_id: Some(packet_id),
            outcome: Outcome::Pending(rx),
        }
    }

    /// `None` for QoS 0 publishes.
    pub fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    pub async fn wait(self) -> crate::Result<T> {
        match self.outcome {
            Outcome::Ready(value) => Ok(value),
            Outcome::Pending(rx) => rx.await.unwrap_or(Err(crate::Error::ConnectionLost)),
        }
    }

    pub async fn wait_timeout(self, timeout: Duration) -> crate::Result<T> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| crate::Error::Timeout)?
    }
}

/// Topic names used for PUBLISH: non-empty, no wildcards.
pub fn validate_topic_name(topic: &str) -> crate::Result<()> {
    if topic.is_empty() || topic.contains(['+', '#', '\0']) || topic.len() > u16::MAX as usize {
        return Err(crate::Error::InvalidTopic(topic.to_owned()));
    }

    Ok(())
}

/// Subscription filters: `+` and `#` occupy whole levels, `#` only last.
pub fn validate_topic_filter(filter: &str) -> crate::Result<()> {
    let invalid = || crate::Error::InvalidTopic(filter.to_owned());

    if filter.is_empty() || filter.contains('\0') || filter.len() > u16::MAX as usize {
        return Err(invalid());
    }

    let mut levels = filter.split('/').peekable();

    while let Some(level) = levels.next() {
        match level {
            "#" if levels.peek().is_some() => return Err(invalid()),
            "#" | "+" => {}
            _ if level.contains(['+', '#']) => return Err(invalid()),
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names() {
        assert!(validate_topic_name("a/b/c").is_ok());
        assert!(validate_topic_name("/").is_ok());
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("a/+").is_err());
        assert!(validate_topic_name("a/#").is_err());
    }

    #[test]
    fn topic_filters() {
        for ok in ["#", "+", "a/+/c", "a/#", "+/+", "/a", "sport/tennis/#"] {
            assert!(validate_topic_filter(ok).is_ok(), "{ok}");
        }

        for bad in ["", "a/#/b", "a#", "a/b+", "sport+", "#/a"] {
            assert!(validate_topic_filter(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn dropped_sender_means_connection_lost() {
        let (tx, rx) = oneshot::channel::<crate::Result<()>>();
        let token = Token::pending(PacketId::new(1).unwrap(), rx);
        drop(tx);

        assert!(matches!(token.wait().await, Err(crate::Error::ConnectionLost)));
    }

    #[tokio::test]
    async fn wait_timeout_expires() {
        let (_tx, rx) = oneshot::channel::<crate::Result<()>>();
        let token = Token::pending(PacketId::new(1).unwrap(), rx);

        assert!(matches!(
            token.wait_timeout(Duration::from_millis(10)).await,
            Err(crate::Error::Timeout)
        ));
    }
}
