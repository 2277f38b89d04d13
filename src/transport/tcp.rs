//! TCP transport
//!
//! The shipping transport: listens on a configured socket address and dials
//! peer addresses parsed as socket addresses. The service identifier plays
//! no role on the wire; TCP has no discovery mode to cancel.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info};

use super::{Connection, Listener, RecvStream, SendStream, Transport};
use crate::link::{PeerAddr, PeerInfo, ServiceId};

pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TcpTransport {
    bind_addr: SocketAddr,
    read_buffer_size: usize,
    dial_timeout: Duration,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            bound_addr: Mutex::new(None),
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// Address the most recent listener actually bound to. Useful when the
    /// configured bind address left the port to the OS.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().unwrap()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Conn = TcpConn;
    type Listener = TcpConnListener;

    async fn listen(&self, _service: &ServiceId) -> io::Result<Self::Listener> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "tcp listener bound");
        *self.bound_addr.lock().unwrap() = Some(local_addr);
        Ok(TcpConnListener {
            listener,
            read_buffer_size: self.read_buffer_size,
        })
    }

    async fn dial(
        &self,
        peer: &PeerAddr,
        _service: &ServiceId,
    ) -> io::Result<(Self::Conn, PeerInfo)> {
        let addr: SocketAddr = peer.as_str().parse().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("bad peer address: {e}"))
        })?;
        debug!(%addr, "dialing");
        let stream = match timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        };
        let info = PeerInfo::new(peer.clone(), None);
        Ok((
            TcpConn {
                stream,
                read_buffer_size: self.read_buffer_size,
            },
            info,
        ))
    }

    async fn cancel_discovery(&self) {}
}

pub struct TcpConnListener {
    listener: TcpListener,
    read_buffer_size: usize,
}

#[async_trait]
impl Listener for TcpConnListener {
    type Conn = TcpConn;

    async fn accept(&mut self) -> io::Result<(Self::Conn, PeerInfo)> {
        let (stream, addr) = self.listener.accept().await?;
        let info = PeerInfo::new(PeerAddr::new(addr.to_string()), None);
        Ok((
            TcpConn {
                stream,
                read_buffer_size: self.read_buffer_size,
            },
            info,
        ))
    }
}

pub struct TcpConn {
    stream: TcpStream,
    read_buffer_size: usize,
}

impl Connection for TcpConn {
    type Rx = TcpRecv;
    type Tx = TcpSend;

    fn split(self) -> (Self::Rx, Self::Tx) {
        let (read_half, write_half) = self.stream.into_split();
        (
            TcpRecv {
                half: read_half,
                buffer_size: self.read_buffer_size,
            },
            TcpSend { half: write_half },
        )
    }
}

pub struct TcpRecv {
    half: OwnedReadHalf,
    buffer_size: usize,
}

#[async_trait]
impl RecvStream for TcpRecv {
    async fn recv(&mut self) -> io::Result<Bytes> {
        let mut buf = vec![0u8; self.buffer_size];
        let n = self.half.read(&mut buf).await?;
        if n == 0 {
            // Clean end-of-stream is fatal to the pump, same as any error.
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed"));
        }
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }
}

pub struct TcpSend {
    half: OwnedWriteHalf,
}

#[async_trait]
impl SendStream for TcpSend {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.half.write_all(bytes).await
    }
}
