use std::future::Future;

use embedded_io_async::ErrorKind;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};
use tracing::{debug, trace};

/// Transport the engine reads and writes packets through.
///
/// `receive` is only ever called from the receiver task, while `send` may be
/// called concurrently from it and from application tasks (writes are
/// serialized by the engine). `receive` returning `Ok(0)` signals an orderly
/// close by the peer.
pub trait Channel: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send(&self, bytes: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn receive(&self, buf: &mut [u8]) -> impl Future<Output = Result<usize, TransportError>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Failure reported by a [`Channel`].
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct TransportError {
    kind: ErrorKind,
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            source: error.into(),
        }
    }

    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Other, error)
    }

    /// The peer closed the stream.
    pub fn closed() -> Self {
        Self::new(ErrorKind::ConnectionAborted, "connection closed by peer")
    }

    pub fn not_connected() -> Self {
        Self::new(ErrorKind::NotConnected, "channel is not connected")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl embedded_io_async::Error for TransportError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        let kind = match error.kind() {
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::PermissionDenied,
            Io::ConnectionRefused => ErrorKind::ConnectionRefused,
            Io::ConnectionReset => ErrorKind::ConnectionReset,
            Io::ConnectionAborted => ErrorKind::ConnectionAborted,
            Io::NotConnected => ErrorKind::NotConnected,
            Io::AddrInUse => ErrorKind::AddrInUse,
            Io::AddrNotAvailable => ErrorKind::AddrNotAvailable,
            Io::BrokenPipe => ErrorKind::BrokenPipe,
            Io::InvalidInput => ErrorKind::InvalidInput,
            Io::InvalidData => ErrorKind::InvalidData,
            Io::TimedOut => ErrorKind::TimedOut,
            Io::Interrupted => ErrorKind::Interrupted,
            Io::Unsupported => ErrorKind::Unsupported,
            Io::WriteZero => ErrorKind::WriteZero,
            _ => ErrorKind::Other,
        };

        Self::new(kind, error)
    }
}

#[derive(Debug)]
pub struct TcpChannel {
    addr: String,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl TcpChannel {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }
}

impl Channel for TcpChannel {
    async fn connect(&self) -> Result<(), TransportError> {
        debug!(addr = %self.addr, "opening tcp connection");

        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);

        Ok(())
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(TransportError::not_connected)?;

        writer.write_all(bytes).await?;
        writer.flush().await?;

        trace!(len = bytes.len(), "tcp send");
        Ok(())
    }

    async fn receive(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or_else(TransportError::not_connected)?;

        let n = reader.read(buf).await?;

        trace!(len = n, "tcp receive");
        Ok(n)
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            // peer may already be gone
            let _ = writer.shutdown().await;
        }

        self.reader.lock().await.take();
        debug!(addr = %self.addr, "tcp connection closed");
    }
}
