use heapless::Vec;
use tracing::warn;

use crate::packet::PacketId;

/// Inbound QoS 2 publishes that were delivered and still wait for PUBREL.
pub(crate) struct Incoming<const N: usize> {
    cursor: usize,
    awaiting_rel: Vec<PacketId, N>,
}

impl<const N: usize> Incoming<N> {
    pub(crate) fn new() -> Self {
        Self {
            cursor: 0,
            awaiting_rel: Vec::new(),
        }
    }

    /// Remembers `packet_id`. Returns `false` if it is a redelivery of a
    /// message already handed to the application.
    pub(crate) fn on_publish(&mut self, packet_id: PacketId) -> bool {
        if self.awaiting_rel.contains(&packet_id) {
            return false;
        }

        if let Err(packet_id) = self.awaiting_rel.push(packet_id) {
            // full: the oldest entry gives way
            warn!(
                evicted = self.awaiting_rel[self.cursor].get(),
                "too many QoS 2 messages awaiting PUBREL"
            );
            self.awaiting_rel[self.cursor] = packet_id;
            self.shift_cursor();
        }

        true
    }

    /// Forgets `packet_id` once PUBREL arrived. Returns whether it was known.
    pub(crate) fn on_pubrel(&mut self, packet_id: PacketId) -> bool {
        match self.awaiting_rel.iter().position(|id| *id == packet_id) {
            Some(index) => {
                self.awaiting_rel.remove(index);
                if self.cursor >= self.awaiting_rel.len() {
                    self.cursor = 0;
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.awaiting_rel.clear();
        self.cursor = 0;
    }

    fn shift_cursor(&mut self) {
        self.cursor += 1;

        if self.cursor >= N {
            self.cursor = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: u16) -> PacketId {
        PacketId::new(value).unwrap()
    }

    #[test]
    fn duplicate_before_pubrel_is_not_redelivered() {
        let mut incoming = Incoming::<4>::new();

        assert!(incoming.on_publish(id(7)));
        assert!(!incoming.on_publish(id(7)));

        assert!(incoming.on_pubrel(id(7)));
        assert!(!incoming.on_pubrel(id(7)));

        // same id reused by the broker after the exchange finished
        assert!(incoming.on_publish(id(7)));
    }

    #[test]
    fn oldest_is_evicted_when_full() {
        let mut incoming = Incoming::<2>::new();

        assert!(incoming.on_publish(id(1)));
        assert!(incoming.on_publish(id(2)));
        assert!(incoming.on_publish(id(3)));

        assert!(!incoming.on_pubrel(id(1)));
        assert!(incoming.on_pubrel(id(2)));
        assert!(incoming.on_pubrel(id(3)));
    }
}
