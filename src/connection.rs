use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use embedded_time::{Clock, Instant};
use parking_lot::{Mutex, RwLock};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    channel::Channel,
    codec::Codec,
    event::{EventHandler, NoopHandler},
    incoming::Incoming,
    inflight::Tracker,
    keep_alive::{self, KeepAlive},
    options::{ClientConfig, ConnectOptions},
    packet::{ConnAck, ConnectReturnCode, Packet},
    protocol::ProtocolVersion,
    receiver::Receiver,
    session::{ConnectionState, Session},
};

/// Inbound QoS 2 ids remembered until PUBREL.
pub(crate) const MAX_INBOUND_QOS2: usize = 64;

pub(crate) type HandshakeSlot = oneshot::Sender<crate::Result<ConnAck>>;

#[derive(Default)]
struct Tasks {
    receiver: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

pub(crate) struct Shared<C, K>
where
    C: Channel,
    K: Clock<T = u64> + Send + Sync + 'static,
{
    pub(crate) channel: C,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) config: ClientConfig,
    pub(crate) clock: K,
    pub(crate) session: Mutex<Session>,
    pub(crate) tracker: Mutex<Tracker<K>>,
    pub(crate) keep_alive: Mutex<Option<KeepAlive<K>>>,
    pub(crate) incoming: Mutex<Incoming<MAX_INBOUND_QOS2>>,
    pub(crate) handshake: Mutex<Option<HandshakeSlot>>,
    pub(crate) handler: RwLock<Arc<dyn EventHandler>>,
    /// Set once the receiver must not call `Channel::receive` again.
    pub(crate) exit: AtomicBool,
    /// Serializes connect, disconnect and teardown.
    lifecycle: tokio::sync::Mutex<()>,
    writer: tokio::sync::Mutex<()>,
    tasks: Mutex<Tasks>,
}

impl<C, K> Shared<C, K>
where
    C: Channel,
    K: Clock<T = u64> + Send + Sync + 'static,
{
    pub(crate) fn new(channel: C, codec: Arc<dyn Codec>, config: ClientConfig, clock: K) -> Self {
        Self {
            channel,
            codec,
            tracker: Mutex::new(Tracker::new(config.retry.clone())),
            config,
            clock,
            session: Mutex::new(Session::new()),
            keep_alive: Mutex::new(None),
            incoming: Mutex::new(Incoming::new()),
            handshake: Mutex::new(None),
            handler: RwLock::new(Arc::new(NoopHandler)),
            exit: AtomicBool::new(true),
            lifecycle: tokio::sync::Mutex::new(()),
            writer: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.session.lock().state()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.session.lock().epoch()
    }

    pub(crate) fn protocol_version(&self) -> ProtocolVersion {
        self.session.lock().protocol_version
    }

    pub(crate) fn now(&self) -> crate::Result<Instant<K>> {
        crate::time::now(&self.clock)
    }

    pub(crate) fn handler(&self) -> Arc<dyn EventHandler> {
        self.handler.read().clone()
    }

    pub(crate) async fn send(&self, packet: &Packet) -> crate::Result<()> {
        let bytes = self.codec.encode(packet, self.protocol_version())?;

        {
            let _writer = self.writer.lock().await;
            self.channel.send(&bytes).await?;
        }

        if let Some(keep_alive) = self.keep_alive.lock().as_mut() {
            keep_alive.on_send(self.now()?);
        }

        Ok(())
    }

    pub(crate) async fn connect(
        self: &Arc<Self>,
        options: &ConnectOptions,
    ) -> crate::Result<ConnectReturnCode> {
        let _lifecycle = self.lifecycle.lock().await;
        let epoch = self.session.lock().begin_connect(options)?;

        info!(client_id = %options.client_id, version = ?options.protocol_version, "connecting");

        if let Err(err) = self.channel.connect().await {
            warn!(error = %err, "channel connect failed");
            self.session.lock().finish_disconnect();
            return Err(crate::Error::Transport(err));
        }

        let (slot, outcome) = oneshot::channel();
        *self.handshake.lock() = Some(slot);
        self.start_receiver(epoch, options.protocol_version);

        let connect = Packet::Connect(options.to_connect());
        if let Err(err) = self.send(&connect).await {
            self.abort_handshake().await;
            return Err(crate::Error::Connection(Box::new(err)));
        }

        let timeout = options
            .connect_timeout
            .unwrap_or(self.config.default_connect_timeout);

        let connack = match tokio::time::timeout(timeout, outcome).await {
            Ok(Ok(Ok(connack))) => connack,
            Ok(Ok(Err(cause))) => {
                warn!(error = %cause, "handshake failed");
                self.abort_handshake().await;
                return Err(crate::Error::Connection(Box::new(cause)));
            }
            Ok(Err(_)) => {
                self.abort_handshake().await;
                return Err(crate::Error::Connection(Box::new(crate::Error::ConnectionLost)));
            }
            Err(_) => {
                warn!(?timeout, "no CONNACK");
                self.abort_handshake().await;
                return Err(crate::Error::Connection(Box::new(crate::Error::ConnectTimeout)));
            }
        };

        let applied = self.session.lock().on_connack(&connack);
        let code = match applied {
            Ok(code) => code,
            Err(err) => {
                self.abort_handshake().await;
                return Err(crate::Error::Connection(Box::new(err)));
            }
        };

        if !code.is_accepted() {
            info!(?code, "connection refused");
            self.stop_tasks().await;
            self.channel.close().await;
            self.session.lock().finish_disconnect();
            return Ok(code);
        }

        let (keep_alive, clean_session) = {
            let session = self.session.lock();
            (session.keep_alive, session.clean_session)
        };

        if clean_session || !connack.session_present {
            self.incoming.lock().clear();
        }

        let now = match self.now() {
            Ok(now) => now,
            Err(err) => {
                self.abort_handshake().await;
                return Err(err);
            }
        };

        *self.keep_alive.lock() = Some(KeepAlive::new(keep_alive, now));
        self.start_monitor(epoch, keep_alive);

        info!(session_present = connack.session_present, keep_alive, "connected");
        Ok(code)
    }

    pub(crate) async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        if self.state() != ConnectionState::Connected {
            debug!("disconnect while not connected");
            return;
        }

        if let Err(err) = self.send(&Packet::Disconnect).await {
            debug!(error = %err, "DISCONNECT not sent");
        }

        self.session.lock().begin_disconnect();
        self.close_session().await;

        info!("disconnected");
    }

    /// Tears down after the receiver or the monitor reported a fatal
    /// condition. Stale reports from an earlier connection are ignored.
    pub(crate) async fn connection_lost(&self, epoch: u64, cause: crate::Error) {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut session = self.session.lock();
            if session.epoch() != epoch || session.state() != ConnectionState::Connected {
                debug!(error = %cause, "ignoring stale connection failure");
                return;
            }
            session.begin_disconnect();
        }

        warn!(error = %cause, "connection lost");
        self.close_session().await;

        self.handler().on_connection_lost(&cause);
    }

    /// Schedules [`Self::connection_lost`] on its own task, so it can stop
    /// the task reporting the failure.
    pub(crate) fn spawn_connection_lost(self: &Arc<Self>, epoch: u64, cause: crate::Error) {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.connection_lost(epoch, cause).await });
    }

    /// Stops everything without I/O. Used when the client is dropped.
    pub(crate) fn abort_tasks(&self) {
        self.exit.store(true, Ordering::SeqCst);

        let mut tasks = self.tasks.lock();
        for handle in [tasks.monitor.take(), tasks.receiver.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    fn start_receiver(self: &Arc<Self>, epoch: u64, version: ProtocolVersion) {
        self.exit.store(false, Ordering::SeqCst);

        let receiver = Receiver::new(Arc::clone(self), epoch, version);
        self.tasks.lock().receiver = Some(tokio::spawn(receiver.run()));
    }

    fn start_monitor(self: &Arc<Self>, epoch: u64, keep_alive_secs: u16) {
        let mut tick = self.config.tick_interval;
        if keep_alive_secs != 0 {
            tick = tick.min(Duration::from_millis(u64::from(keep_alive_secs) * 500));
        }

        let monitor = keep_alive::run(Arc::clone(self), epoch, tick);
        self.tasks.lock().monitor = Some(tokio::spawn(monitor));
    }

    async fn stop_tasks(&self) {
        self.exit.store(true, Ordering::SeqCst);

        let (monitor, receiver) = {
            let mut tasks = self.tasks.lock();
            (tasks.monitor.take(), tasks.receiver.take())
        };

        for handle in [monitor, receiver].into_iter().flatten() {
            handle.abort();
            // cancelled or already finished, either way it is gone
            let _ = handle.await;
        }
    }

    async fn abort_handshake(&self) {
        self.handshake.lock().take();
        self.stop_tasks().await;
        self.channel.close().await;
        self.session.lock().finish_disconnect();
    }

    async fn close_session(&self) {
        self.stop_tasks().await;
        self.channel.close().await;

        self.keep_alive.lock().take();
        self.tracker.lock().cancel_all();
        self.incoming.lock().clear();
        self.session.lock().finish_disconnect();
    }
}
