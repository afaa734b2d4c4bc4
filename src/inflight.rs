use embedded_time::{Clock, Instant};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::{
    options::RetryPolicy,
    packet::{Ack, Packet, PacketId, Publish, QoS, SubAckReturnCode},
};

/// Most QoS 1/2 publishes awaiting acknowledgment at once.
pub const MAX_INFLIGHT: usize = 64;

pub(crate) type PublishCompletion = oneshot::Sender<crate::Result<()>>;
pub(crate) type SubscribeCompletion = oneshot::Sender<crate::Result<Vec<SubAckReturnCode>>>;
pub(crate) type UnsubscribeCompletion = oneshot::Sender<crate::Result<Vec<u8>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InflightKind {
    /// PUBLISH sent, waiting for PUBACK.
    QoS1Publish,
    /// PUBLISH sent, waiting for PUBREC.
    QoS2PublishPhase1,
    /// PUBREL sent, waiting for PUBCOMP.
    QoS2PublishPhase2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckKind {
    PubAck,
    PubRec,
    PubComp,
}

impl AckKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::PubAck => "PUBACK",
            Self::PubRec => "PUBREC",
            Self::PubComp => "PUBCOMP",
        }
    }
}

#[derive(Debug)]
pub struct InflightRecord<C: Clock> {
    pub packet_id: PacketId,
    pub kind: InflightKind,
    pub publish: Publish,
    pub attempts: u32,
    pub last_sent_at: Instant<C>,
    pub deadline: Instant<C>,
    degraded: bool,
    completion: Option<PublishCompletion>,
}

#[derive(Debug, PartialEq)]
pub enum AckOutcome {
    /// The exchange is finished and the id released.
    Completed(PacketId),
    /// PUBREC accepted, PUBREL must go out.
    SendPubRel(PacketId),
    /// The broker rejected the publish (MQTT 5 reason code).
    Rejected(PacketId, u8),
}

#[derive(Debug, Default)]
pub struct Sweep {
    pub resend: Vec<Packet>,
    /// `(packet id, attempts so far)` for exchanges that just crossed
    /// `RetryPolicy::max_attempts`.
    pub degraded: Vec<(PacketId, u32)>,
}

#[derive(Debug)]
enum Request {
    Subscribe(PacketId, SubscribeCompletion),
    Unsubscribe(PacketId, UnsubscribeCompletion),
}

impl Request {
    fn packet_id(&self) -> PacketId {
        match self {
            Self::Subscribe(id, _) | Self::Unsubscribe(id, _) => *id,
        }
    }
}

#[derive(Debug)]
pub struct Tracker<C: Clock<T = u64>> {
    records: heapless::Vec<InflightRecord<C>, MAX_INFLIGHT>,
    requests: Vec<Request>,
    next_id: u16,
    policy: RetryPolicy,
}

impl<C: Clock<T = u64>> Tracker<C> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            records: heapless::Vec::new(),
            requests: Vec::new(),
            next_id: 1,
            policy,
        }
    }

    /// Next free id, counting up from the last one handed out and wrapping
    /// from 65535 to 1.
    pub fn allocate_id(&mut self) -> crate::Result<PacketId> {
        for _ in 0..u16::MAX {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);

            let Some(packet_id) = PacketId::new(id) else {
                continue;
            };

            if self.contains(packet_id) {
                continue;
            }

            return Ok(packet_id);
        }

        Err(crate::Error::NoPacketIdAvailable)
    }

    pub fn contains(&self, packet_id: PacketId) -> bool {
        self.records.iter().any(|r| r.packet_id == packet_id)
            || self.requests.iter().any(|r| r.packet_id() == packet_id)
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, packet_id: PacketId) -> Option<&InflightRecord<C>> {
        self.records.iter().find(|r| r.packet_id == packet_id)
    }

    pub fn track_outbound(
        &mut self,
        packet_id: PacketId,
        kind: InflightKind,
        publish: Publish,
        now: Instant<C>,
        completion: Option<PublishCompletion>,
    ) -> crate::Result<()> {
        if self.contains(packet_id) {
            warn!(packet_id = packet_id.get(), "packet id already in flight");
            return Err(crate::Error::DuplicateId(packet_id.get()));
        }

        let record = InflightRecord {
            packet_id,
            kind,
            publish,
            attempts: 1,
            last_sent_at: now,
            deadline: self.policy.next_deadline(1, now),
            degraded: false,
            completion,
        };

        self.records
            .push(record)
            .map_err(|_| crate::Error::InflightWindowFull)?;

        trace!(packet_id = packet_id.get(), ?kind, "tracking");
        Ok(())
    }

    pub(crate) fn track_subscribe(
        &mut self,
        packet_id: PacketId,
        completion: SubscribeCompletion,
    ) -> crate::Result<()> {
        if self.contains(packet_id) {
            return Err(crate::Error::DuplicateId(packet_id.get()));
        }

        self.requests.push(Request::Subscribe(packet_id, completion));
        Ok(())
    }

    pub(crate) fn track_unsubscribe(
        &mut self,
        packet_id: PacketId,
        completion: UnsubscribeCompletion,
    ) -> crate::Result<()> {
        if self.contains(packet_id) {
            return Err(crate::Error::DuplicateId(packet_id.get()));
        }

        self.requests.push(Request::Unsubscribe(packet_id, completion));
        Ok(())
    }

    pub(crate) fn forget(&mut self, packet_id: PacketId) {
        if let Some(index) = self.records.iter().position(|r| r.packet_id == packet_id) {
            self.records.swap_remove(index);
        }
        self.requests.retain(|r| r.packet_id() != packet_id);
    }

    pub fn acknowledge(
        &mut self,
        ack: Ack,
        ack_kind: AckKind,
        now: Instant<C>,
    ) -> crate::Result<AckOutcome> {
        let packet_id = ack.packet_id;

        let Some(index) = self.records.iter().position(|r| r.packet_id == packet_id) else {
            return Err(crate::Error::UnknownId(packet_id.get()));
        };

        let kind = self.records[index].kind;

        match (kind, ack_kind) {
            (InflightKind::QoS1Publish, AckKind::PubAck)
            | (InflightKind::QoS2PublishPhase1, AckKind::PubRec)
                if ack.is_failure() =>
            {
                self.finish(index, Err(crate::Error::PublishFailed(ack.reason_code)));
                Ok(AckOutcome::Rejected(packet_id, ack.reason_code))
            }
            (InflightKind::QoS1Publish, AckKind::PubAck)
            | (InflightKind::QoS2PublishPhase2, AckKind::PubComp) => {
                self.finish(index, Ok(()));
                Ok(AckOutcome::Completed(packet_id))
            }
            (InflightKind::QoS2PublishPhase1, AckKind::PubRec)
            | (InflightKind::QoS2PublishPhase2, AckKind::PubRec) => {
                // a repeated PUBREC means our PUBREL went missing
                let record = &mut self.records[index];
                record.kind = InflightKind::QoS2PublishPhase2;
                record.attempts = 1;
                record.last_sent_at = now;
                record.deadline = self.policy.next_deadline(1, now);
                record.degraded = false;
                Ok(AckOutcome::SendPubRel(packet_id))
            }
            _ => {
                warn!(packet_id = packet_id.get(), ?kind, ?ack_kind, "unexpected acknowledgment");
                Err(crate::Error::UnknownId(packet_id.get()))
            }
        }
    }

    pub(crate) fn complete_subscribe(
        &mut self,
        packet_id: PacketId,
        codes: Vec<SubAckReturnCode>,
    ) -> crate::Result<()> {
        match self.take_request(packet_id) {
            Some(Request::Subscribe(_, completion)) => {
                let _ = completion.send(Ok(codes));
                Ok(())
            }
            other => self.unmatched(packet_id, other),
        }
    }

    pub(crate) fn complete_unsubscribe(
        &mut self,
        packet_id: PacketId,
        codes: Vec<u8>,
    ) -> crate::Result<()> {
        match self.take_request(packet_id) {
            Some(Request::Unsubscribe(_, completion)) => {
                let _ = completion.send(Ok(codes));
                Ok(())
            }
            other => self.unmatched(packet_id, other),
        }
    }

    pub fn sweep(&mut self, now: Instant<C>) -> Sweep {
        let mut sweep = Sweep::default();

        for record in self.records.iter_mut().filter(|r| now >= r.deadline) {
            if record.attempts >= self.policy.max_attempts && !record.degraded {
                record.degraded = true;
                sweep.degraded.push((record.packet_id, record.attempts));
            }

            record.attempts = record.attempts.saturating_add(1);
            record.last_sent_at = now;
            record.deadline = self.policy.next_deadline(record.attempts, now);

            let packet = match record.kind {
                InflightKind::QoS1Publish | InflightKind::QoS2PublishPhase1 => {
                    let mut publish = record.publish.clone();
                    publish.flags.dup = true;
                    Packet::Publish(publish)
                }
                InflightKind::QoS2PublishPhase2 => Packet::PubRel(Ack::new(record.packet_id)),
            };

            debug!(
                packet_id = record.packet_id.get(),
                attempts = record.attempts,
                "resending"
            );
            sweep.resend.push(packet);
        }

        sweep
    }

    /// Fails every outstanding exchange with [`crate::Error::ConnectionLost`].
    pub fn cancel_all(&mut self) {
        let pending = self.len();

        for record in self.records.iter_mut() {
            if let Some(completion) = record.completion.take() {
                let _ = completion.send(Err(crate::Error::ConnectionLost));
            }
        }
        self.records.clear();

        for request in self.requests.drain(..) {
            match request {
                Request::Subscribe(_, completion) => {
                    let _ = completion.send(Err(crate::Error::ConnectionLost));
                }
                Request::Unsubscribe(_, completion) => {
                    let _ = completion.send(Err(crate::Error::ConnectionLost));
                }
            }
        }

        if pending > 0 {
            debug!(pending, "cancelled in-flight exchanges");
        }
    }

    fn finish(&mut self, index: usize, result: crate::Result<()>) {
        let mut record = self.records.swap_remove(index);

        if let Some(completion) = record.completion.take() {
            // receiver may have been dropped by the caller
            let _ = completion.send(result);
        }
    }

    fn take_request(&mut self, packet_id: PacketId) -> Option<Request> {
        let index = self.requests.iter().position(|r| r.packet_id() == packet_id)?;
        Some(self.requests.swap_remove(index))
    }

    fn unmatched(&mut self, packet_id: PacketId, request: Option<Request>) -> crate::Result<()> {
        if let Some(request) = request {
            // wrong ack type for this id, keep waiting for the right one
            self.requests.push(request);
        }

        warn!(packet_id = packet_id.get(), "acknowledgment for unknown request");
        Err(crate::Error::UnknownId(packet_id.get()))
    }
}

/// Kind of record a fresh publish starts as, `None` for QoS 0.
pub fn initial_kind(qos: QoS) -> Option<InflightKind> {
    match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce => Some(InflightKind::QoS1Publish),
        QoS::ExactlyOnce => Some(InflightKind::QoS2PublishPhase1),
    }
}
