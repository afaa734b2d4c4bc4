use std::time::Duration;

use bytes::Bytes;
use embedded_time::{Clock, Instant};

use crate::{
    packet::{Connect, QoS, Will, properties::Properties},
    protocol::ProtocolVersion,
};

#[derive(Clone, Debug, PartialEq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub protocol_version: ProtocolVersion,
    pub clean_session: bool,
    /// Seconds, `0` disables keep-alive.
    pub keep_alive: u16,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    /// Falls back to [`ClientConfig::default_connect_timeout`].
    pub connect_timeout: Option<Duration>,
    /// MQTT 5 only.
    pub session_expiry_interval: Option<u32>,
    /// MQTT 5 only.
    pub receive_maximum: Option<u16>,
}

impl ConnectOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            protocol_version: ProtocolVersion::default(),
            clean_session: true,
            keep_alive: 60,
            will: None,
            username: None,
            password: None,
            connect_timeout: None,
            session_expiry_interval: None,
            receive_maximum: None,
        }
    }

    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    pub fn with_will(
        mut self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Self {
        self.will = Some(Will {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        });
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<Bytes>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_session_expiry_interval(mut self, seconds: u32) -> Self {
        self.session_expiry_interval = Some(seconds);
        self
    }

    pub fn with_receive_maximum(mut self, maximum: u16) -> Self {
        self.receive_maximum = Some(maximum);
        self
    }

    pub(crate) fn to_connect(&self) -> Connect {
        let properties = if self.protocol_version == ProtocolVersion::V5 {
            Properties {
                session_expiry_interval: self.session_expiry_interval,
                receive_maximum: self.receive_maximum,
                ..Properties::default()
            }
        } else {
            Properties::default()
        };

        Connect {
            clean_session: self.clean_session,
            keep_alive: self.keep_alive,
            client_id: self.client_id.clone(),
            will: self.will.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            properties,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub retry: RetryPolicy,
    /// Size of the buffer handed to `Channel::receive`.
    pub receive_buffer_size: usize,
    pub max_packet_size: usize,
    /// Period of the keep-alive and retry sweep timer.
    pub tick_interval: Duration,
    pub default_connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            receive_buffer_size: 4096,
            max_packet_size: 256 * 1024,
            tick_interval: Duration::from_millis(500),
            default_connect_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_timeout: Duration,
    pub max_timeout: Duration,
    pub backoff: Backoff,
    /// Attempts after which delivery is reported as degraded. Resending
    /// continues regardless.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_secs(10),
            max_timeout: Duration::from_secs(120),
            backoff: Backoff::Exponential,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// How long to wait for an acknowledgment after the `attempts`-th send.
    pub fn timeout_after(&self, attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.initial_timeout,
            Backoff::Exponential => {
                let shift = attempts.saturating_sub(1).min(16);
                self.initial_timeout
                    .saturating_mul(1 << shift)
                    .min(self.max_timeout)
            }
        }
    }

    pub fn next_deadline<C: Clock<T = u64>>(
        &self,
        attempts: u32,
        last_sent_at: Instant<C>,
    ) -> Instant<C> {
        let timeout = self.timeout_after(attempts);
        crate::time::after(last_sent_at, timeout.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use embedded_time::Clock;

    use super::*;
    use crate::time::testing::ManualClock;

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            initial_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(5),
            backoff: Backoff::Exponential,
            max_attempts: 3,
        };

        assert_eq!(policy.timeout_after(1), Duration::from_secs(1));
        assert_eq!(policy.timeout_after(2), Duration::from_secs(2));
        assert_eq!(policy.timeout_after(3), Duration::from_secs(4));
        assert_eq!(policy.timeout_after(4), Duration::from_secs(5));
        assert_eq!(policy.timeout_after(40), Duration::from_secs(5));
    }

    #[test]
    fn fixed_backoff() {
        let policy = RetryPolicy {
            backoff: Backoff::Fixed,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.timeout_after(1), policy.timeout_after(7));
    }

    #[test]
    fn deadline_from_last_send() {
        let clock = ManualClock::default();
        let policy = RetryPolicy {
            initial_timeout: Duration::from_millis(200),
            ..RetryPolicy::default()
        };

        clock.advance_ms(1_000);
        let sent = clock.try_now().unwrap();
        let deadline = policy.next_deadline(2, sent);

        clock.advance_ms(399);
        assert!(clock.try_now().unwrap() < deadline);
        clock.advance_ms(1);
        assert!(clock.try_now().unwrap() >= deadline);
    }

    #[test]
    fn v5_properties_only_for_v5() {
        let options = ConnectOptions::new("c")
            .with_session_expiry_interval(30)
            .with_receive_maximum(10);
        assert_eq!(options.to_connect().properties, Properties::default());

        let connect = options
            .with_protocol_version(ProtocolVersion::V5)
            .to_connect();
        assert_eq!(connect.properties.session_expiry_interval, Some(30));
        assert_eq!(connect.properties.receive_maximum, Some(10));
    }

    #[test]
    fn defaults() {
        let options = ConnectOptions::new("client");

        assert_eq!(options.protocol_version, ProtocolVersion::V311);
        assert!(options.clean_session);
        assert_eq!(options.keep_alive, 60);
        assert_eq!(ClientConfig::default().receive_buffer_size, 4096);
    }
}
