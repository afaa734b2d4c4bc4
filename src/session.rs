use crate::{
    options::ConnectOptions,
    packet::{ConnAck, ConnectReturnCode},
    protocol::ProtocolVersion,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// States in which the receiver task is allowed to run.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

#[derive(Debug, Default)]
pub struct Session {
    pub client_id: String,
    pub protocol_version: ProtocolVersion,
    pub clean_session: bool,
    pub keep_alive: u16,
    state: ConnectionState,
    session_present: bool,
    epoch: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_present(&self) -> bool {
        self.session_present
    }

    /// Counts connection attempts, so work left over from an earlier
    /// connection can recognise itself as stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn begin_connect(&mut self, options: &ConnectOptions) -> crate::Result<u64> {
        if self.state != ConnectionState::Disconnected {
            return Err(crate::Error::InvalidState(self.state));
        }

        self.client_id.clone_from(&options.client_id);
        self.protocol_version = options.protocol_version;
        self.clean_session = options.clean_session;
        self.keep_alive = options.keep_alive;
        self.session_present = false;
        self.state = ConnectionState::Connecting;
        self.epoch += 1;

        Ok(self.epoch)
    }

    /// Applies the CONNACK: `Connected` on acceptance, `Disconnecting` on refusal.
    pub(crate) fn on_connack(&mut self, packet: &ConnAck) -> crate::Result<ConnectReturnCode> {
        if self.state != ConnectionState::Connecting {
            return Err(crate::Error::ProtocolViolation);
        }

        if !packet.return_code.is_accepted() {
            self.state = ConnectionState::Disconnecting;
            return Ok(packet.return_code);
        }

        self.state = ConnectionState::Connected;
        self.session_present = packet.session_present;

        if let Some(keep_alive) = packet.properties.server_keep_alive {
            self.keep_alive = keep_alive;
        }

        if let Some(client_id) = &packet.properties.assigned_client_identifier {
            self.client_id.clone_from(client_id);
        }

        Ok(packet.return_code)
    }

    pub(crate) fn begin_disconnect(&mut self) -> bool {
        if self.state.is_active() {
            self.state = ConnectionState::Disconnecting;
            true
        } else {
            false
        }
    }

    pub(crate) fn finish_disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.session_present = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::properties::Properties;

    fn connack(return_code: ConnectReturnCode) -> ConnAck {
        ConnAck {
            session_present: false,
            return_code,
            properties: Properties::default(),
        }
    }

    #[test]
    fn accepted_handshake() {
        let mut session = Session::new();
        let epoch = session.begin_connect(&ConnectOptions::new("c")).unwrap();

        assert_eq!(epoch, 1);
        assert_eq!(session.state(), ConnectionState::Connecting);

        let code = session.on_connack(&connack(ConnectReturnCode::Accepted)).unwrap();
        assert!(code.is_accepted());
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn refusal_moves_to_disconnecting() {
        let mut session = Session::new();
        session.begin_connect(&ConnectOptions::new("c")).unwrap();

        let code = session
            .on_connack(&connack(ConnectReturnCode::NotAuthorized))
            .unwrap();

        assert_eq!(code, ConnectReturnCode::NotAuthorized);
        assert_eq!(session.state(), ConnectionState::Disconnecting);
    }

    #[test]
    fn connect_only_from_disconnected() {
        let mut session = Session::new();
        session.begin_connect(&ConnectOptions::new("c")).unwrap();

        assert!(matches!(
            session.begin_connect(&ConnectOptions::new("c")),
            Err(crate::Error::InvalidState(ConnectionState::Connecting))
        ));
    }

    #[test]
    fn connack_outside_handshake() {
        let mut session = Session::new();

        assert!(matches!(
            session.on_connack(&connack(ConnectReturnCode::Accepted)),
            Err(crate::Error::ProtocolViolation)
        ));
    }

    #[test]
    fn server_keep_alive_overrides() {
        let mut session = Session::new();
        session
            .begin_connect(&ConnectOptions::new("c").with_keep_alive(60))
            .unwrap();

        let mut packet = connack(ConnectReturnCode::Accepted);
        packet.properties.server_keep_alive = Some(15);
        session.on_connack(&packet).unwrap();

        assert_eq!(session.keep_alive, 15);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut session = Session::new();
        assert!(!session.begin_disconnect());

        session.begin_connect(&ConnectOptions::new("c")).unwrap();
        assert!(session.begin_disconnect());
        session.finish_disconnect();

        assert!(!session.begin_disconnect());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
