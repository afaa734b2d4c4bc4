use std::{sync::Arc, time::Duration};

use embedded_time::{Clock, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::{channel::Channel, connection::Shared, packet::Packet};

/// Ping scheduling and peer liveness for one connection.
///
/// A PINGREQ is due once either direction was silent for half the keep-alive
/// interval. The peer is gone once nothing arrived for a whole interval,
/// whatever the outbound traffic.
pub(crate) struct KeepAlive<C: Clock<T = u64>> {
    keep_alive_ms: u64,
    last_outbound: Instant<C>,
    last_inbound: Instant<C>,
    ping_sent_at: Option<Instant<C>>,
}

impl<C: Clock<T = u64>> KeepAlive<C> {
    pub(crate) fn new(keep_alive_secs: u16, now: Instant<C>) -> Self {
        Self {
            keep_alive_ms: u64::from(keep_alive_secs) * 1_000,
            last_outbound: now,
            last_inbound: now,
            ping_sent_at: None,
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.keep_alive_ms != 0
    }

    pub(crate) fn interval_ms(&self) -> u64 {
        self.keep_alive_ms
    }

    pub(crate) fn on_send(&mut self, now: Instant<C>) {
        self.last_outbound = now;
    }

    pub(crate) fn on_receive(&mut self, now: Instant<C>) {
        self.last_inbound = now;
        self.ping_sent_at = None;
    }

    pub(crate) fn ping_outstanding(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Returns `true` and marks a ping outstanding if one should go out now.
    pub(crate) fn should_ping(&mut self, now: Instant<C>) -> bool {
        if !self.enabled() || self.ping_outstanding() {
            return false;
        }

        let half = self.keep_alive_ms / 2;
        let quiet = now >= crate::time::after(self.last_outbound, half)
            || now >= crate::time::after(self.last_inbound, half);

        if quiet {
            self.ping_sent_at = Some(now);
        }
        quiet
    }

    pub(crate) fn timed_out(&self, now: Instant<C>) -> bool {
        self.enabled() && now >= crate::time::after(self.last_inbound, self.keep_alive_ms)
    }
}

/// Periodic task: sends PINGREQ when due, detects an unresponsive peer and
/// drives the in-flight retry sweep.
pub(crate) async fn run<C, K>(shared: Arc<Shared<C, K>>, epoch: u64, tick: Duration)
where
    C: Channel,
    K: Clock<T = u64> + Send + Sync + 'static,
{
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        match check(&shared).await {
            Ok(()) => {}
            Err(cause) if cause.is_fatal() => {
                shared.spawn_connection_lost(epoch, cause);
                return;
            }
            Err(cause) => warn!(error = %cause, "keep-alive tick skipped"),
        }
    }
}

async fn check<C, K>(shared: &Shared<C, K>) -> crate::Result<()>
where
    C: Channel,
    K: Clock<T = u64> + Send + Sync + 'static,
{
    let now = shared.now()?;

    let ping = {
        let mut keep_alive = shared.keep_alive.lock();
        let Some(keep_alive) = keep_alive.as_mut() else {
            return Ok(());
        };

        if keep_alive.timed_out(now) {
            warn!(keep_alive_ms = keep_alive.interval_ms(), "peer silent");
            return Err(crate::Error::KeepAliveTimeout);
        }

        keep_alive.should_ping(now)
    };

    if ping {
        debug!("sending PINGREQ");
        shared.send(&Packet::PingReq).await?;
    }

    let sweep = shared.tracker.lock().sweep(now);

    if !sweep.degraded.is_empty() {
        let handler = shared.handler();
        for (packet_id, attempts) in sweep.degraded {
            warn!(packet_id = packet_id.get(), attempts, "delivery degraded");
            handler.on_delivery_degraded(packet_id, attempts);
        }
    }

    for packet in &sweep.resend {
        shared.send(packet).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use embedded_time::Clock;

    use super::*;
    use crate::time::testing::ManualClock;

    #[test]
    fn ping_after_half_interval_of_silence() {
        let clock = ManualClock::default();
        let mut keep_alive = KeepAlive::new(10, clock.try_now().unwrap());

        clock.advance_ms(4_999);
        assert!(!keep_alive.should_ping(clock.try_now().unwrap()));

        clock.advance_ms(1);
        assert!(keep_alive.should_ping(clock.try_now().unwrap()));
        // only one ping outstanding at a time
        assert!(!keep_alive.should_ping(clock.try_now().unwrap()));
    }

    #[test]
    fn inbound_silence_pings_despite_outbound_traffic() {
        let clock = ManualClock::default();
        let mut keep_alive = KeepAlive::new(10, clock.try_now().unwrap());

        clock.advance_ms(4_000);
        keep_alive.on_send(clock.try_now().unwrap());
        clock.advance_ms(999);
        assert!(!keep_alive.should_ping(clock.try_now().unwrap()));

        clock.advance_ms(1);
        keep_alive.on_send(clock.try_now().unwrap());
        assert!(keep_alive.should_ping(clock.try_now().unwrap()));
    }

    #[test]
    fn traffic_both_ways_postpones_ping() {
        let clock = ManualClock::default();
        let mut keep_alive = KeepAlive::new(10, clock.try_now().unwrap());

        clock.advance_ms(4_000);
        keep_alive.on_send(clock.try_now().unwrap());
        keep_alive.on_receive(clock.try_now().unwrap());
        clock.advance_ms(4_000);

        assert!(!keep_alive.should_ping(clock.try_now().unwrap()));
    }

    #[test]
    fn timeout_without_response() {
        let clock = ManualClock::default();
        let mut keep_alive = KeepAlive::new(2, clock.try_now().unwrap());

        clock.advance_ms(1_000);
        assert!(keep_alive.should_ping(clock.try_now().unwrap()));

        clock.advance_ms(999);
        assert!(!keep_alive.timed_out(clock.try_now().unwrap()));

        clock.advance_ms(1);
        assert!(keep_alive.timed_out(clock.try_now().unwrap()));
    }

    #[test]
    fn outbound_traffic_does_not_hide_a_silent_peer() {
        let clock = ManualClock::default();
        let mut keep_alive = KeepAlive::new(2, clock.try_now().unwrap());

        for _ in 0..9 {
            clock.advance_ms(200);
            keep_alive.on_send(clock.try_now().unwrap());
            assert!(!keep_alive.timed_out(clock.try_now().unwrap()));
        }

        clock.advance_ms(200);
        keep_alive.on_send(clock.try_now().unwrap());
        assert!(keep_alive.timed_out(clock.try_now().unwrap()));
    }

    #[test]
    fn inbound_traffic_clears_outstanding_ping() {
        let clock = ManualClock::default();
        let mut keep_alive = KeepAlive::new(2, clock.try_now().unwrap());

        clock.advance_ms(1_000);
        assert!(keep_alive.should_ping(clock.try_now().unwrap()));
        keep_alive.on_receive(clock.try_now().unwrap());
        assert!(!keep_alive.ping_outstanding());

        clock.advance_ms(1_999);
        assert!(!keep_alive.timed_out(clock.try_now().unwrap()));
    }

    #[test]
    fn zero_disables() {
        let clock = ManualClock::default();
        let mut keep_alive = KeepAlive::new(0, clock.try_now().unwrap());

        clock.advance_ms(1_000_000);
        assert!(!keep_alive.should_ping(clock.try_now().unwrap()));
        assert!(!keep_alive.timed_out(clock.try_now().unwrap()));
    }
}
