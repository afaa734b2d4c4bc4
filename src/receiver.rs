use std::sync::{Arc, atomic::Ordering};

use embedded_io_async::ErrorKind;
use embedded_time::Clock;
use tracing::{debug, trace, warn};

use crate::{
    channel::{Channel, TransportError},
    connection::Shared,
    event::Message,
    inflight::{AckKind, AckOutcome},
    packet::{Ack, Packet, Publish, QoS},
    parser::Assembler,
    protocol::ProtocolVersion,
};

pub(crate) struct Receiver<C, K>
where
    C: Channel,
    K: Clock<T = u64> + Send + Sync + 'static,
{
    shared: Arc<Shared<C, K>>,
    epoch: u64,
    version: ProtocolVersion,
    assembler: Assembler,
    buf: Vec<u8>,
}

impl<C, K> Receiver<C, K>
where
    C: Channel,
    K: Clock<T = u64> + Send + Sync + 'static,
{
    pub(crate) fn new(shared: Arc<Shared<C, K>>, epoch: u64, version: ProtocolVersion) -> Self {
        let assembler = Assembler::new(shared.config.max_packet_size);
        let buf = vec![0; shared.config.receive_buffer_size.max(1)];

        Self {
            shared,
            epoch,
            version,
            assembler,
            buf,
        }
    }

    pub(crate) async fn run(mut self) {
        let result = self.read_loop().await;

        // no further receive once the loop has ended
        self.shared.exit.store(true, Ordering::SeqCst);

        let Err(cause) = result else {
            debug!("receiver stopped");
            return;
        };

        debug!(error = %cause, "receiver terminated");

        let slot = self.shared.handshake.lock().take();
        match slot {
            Some(slot) => {
                // connect is waiting and will clean up
                let _ = slot.send(Err(cause));
            }
            None => self.shared.spawn_connection_lost(self.epoch, cause),
        }
    }

    async fn read_loop(&mut self) -> crate::Result<()> {
        loop {
            if self.shared.exit.load(Ordering::SeqCst) {
                return Ok(());
            }

            let n = self.shared.channel.receive(&mut self.buf).await?;
            if n == 0 {
                return Err(TransportError::closed().into());
            }
            if n > self.buf.len() {
                return Err(TransportError::new(
                    ErrorKind::InvalidData,
                    format!("receive reported {n} bytes into a {} byte buffer", self.buf.len()),
                )
                .into());
            }

            trace!(len = n, "received");
            self.assembler.feed(&self.buf[..n]);

            while let Some(packet) = self
                .assembler
                .next_packet(self.shared.codec.as_ref(), self.version)?
            {
                self.dispatch(packet).await?;
            }
        }
    }

    /// Routes one packet. Errors returned here end the connection.
    async fn dispatch(&mut self, packet: Packet) -> crate::Result<()> {
        trace!(packet_type = ?packet.packet_type(), "dispatch");

        let now = self.shared.now()?;
        if let Some(keep_alive) = self.shared.keep_alive.lock().as_mut() {
            keep_alive.on_receive(now);
        }

        if let Packet::ConnAck(connack) = packet {
            let slot = self.shared.handshake.lock().take();
            return match slot {
                Some(slot) => {
                    let _ = slot.send(Ok(connack));
                    Ok(())
                }
                None => Err(crate::Error::ProtocolViolation),
            };
        }

        if self.shared.handshake.lock().is_some() {
            // nothing but CONNACK may precede the handshake result
            return Err(crate::Error::ProtocolViolation);
        }

        match packet {
            Packet::Publish(publish) => self.on_publish(publish).await,
            Packet::PubAck(ack) => self.on_ack(ack, AckKind::PubAck).await,
            Packet::PubRec(ack) => self.on_ack(ack, AckKind::PubRec).await,
            Packet::PubComp(ack) => self.on_ack(ack, AckKind::PubComp).await,
            Packet::PubRel(ack) => {
                if !self.shared.incoming.lock().on_pubrel(ack.packet_id) {
                    debug!(packet_id = ack.packet_id.get(), "PUBREL for unknown id");
                }
                self.shared
                    .send(&Packet::PubComp(Ack::new(ack.packet_id)))
                    .await
            }
            Packet::SubAck(suback) => {
                let completed = self
                    .shared
                    .tracker
                    .lock()
                    .complete_subscribe(suback.packet_id, suback.return_codes);
                ignore_unmatched(completed, "SUBACK")
            }
            Packet::UnsubAck(unsuback) => {
                let completed = self
                    .shared
                    .tracker
                    .lock()
                    .complete_unsubscribe(unsuback.packet_id, unsuback.reason_codes);
                ignore_unmatched(completed, "UNSUBACK")
            }
            Packet::PingReq => self.shared.send(&Packet::PingResp).await,
            Packet::PingResp => Ok(()),
            Packet::Disconnect => {
                debug!("server sent DISCONNECT");
                Err(crate::Error::ConnectionLost)
            }
            Packet::ConnAck(_)
            | Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_) => Err(crate::Error::ProtocolViolation),
        }
    }

    async fn on_publish(&mut self, publish: Publish) -> crate::Result<()> {
        let handler = self.shared.handler();

        match (publish.flags.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => {
                handler.on_message(&Message::from(&publish));
                Ok(())
            }
            (QoS::AtLeastOnce, Some(packet_id)) => {
                handler.on_message(&Message::from(&publish));
                self.shared.send(&Packet::PubAck(Ack::new(packet_id))).await
            }
            (QoS::ExactlyOnce, Some(packet_id)) => {
                let first = self.shared.incoming.lock().on_publish(packet_id);
                if first {
                    handler.on_message(&Message::from(&publish));
                } else {
                    debug!(packet_id = packet_id.get(), "duplicate QoS 2 publish");
                }
                self.shared.send(&Packet::PubRec(Ack::new(packet_id))).await
            }
            (_, None) => Err(crate::Error::MalformedPacket),
        }
    }

    async fn on_ack(&mut self, ack: Ack, kind: AckKind) -> crate::Result<()> {
        let now = self.shared.now()?;
        let outcome = self.shared.tracker.lock().acknowledge(ack, kind, now);

        match outcome {
            Ok(AckOutcome::Completed(packet_id)) => {
                self.shared.handler().on_delivery_complete(packet_id);
                Ok(())
            }
            Ok(AckOutcome::SendPubRel(packet_id)) => {
                self.shared.send(&Packet::PubRel(Ack::new(packet_id))).await
            }
            Ok(AckOutcome::Rejected(packet_id, reason)) => {
                warn!(packet_id = packet_id.get(), reason, "publish rejected");
                Ok(())
            }
            Err(err) => ignore_unmatched(Err(err), kind.name()),
        }
    }
}

/// Correlation faults leave the session intact; anything else ends it.
fn ignore_unmatched(result: crate::Result<()>, packet: &str) -> crate::Result<()> {
    match result {
        Err(err) if !err.is_fatal() => {
            warn!(error = %err, packet, "ignoring acknowledgment");
            Ok(())
        }
        other => other,
    }
}
