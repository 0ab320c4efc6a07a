//! # Control Channel
//!
//! A single long-lived, bidirectional connection between the Driver and the
//! Controller. The `ControlChannel` trait is the session object both loops
//! operate on; it is created once when the session starts and closed once
//! when it ends, on every exit path.
//!
//! ## Implementations
//!
//! - **TcpControlChannel**: the production transport. The Controller accepts
//!   exactly one connection through `ControlListener`; the Driver connects
//!   with `TcpControlChannel::connect`.
//! - **MemoryChannel**: two connected in-process endpoints. Frames are still
//!   encoded with the configured `WireFormat`, so both loops can be run
//!   against each other without a socket.
//!
//! The channel does not retry, multiplex, or time out. Because the protocol
//! is half-duplex, legacy frames need no delimiter: one transport read is
//! one message.

use crate::error::ControlError;
use crate::protocol::{ControlMessage, WireFormat, MAX_MESSAGE_LEN};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Message-oriented, half-duplex control connection.
#[async_trait]
pub trait ControlChannel: Send {
    /// Write one message and flush it.
    async fn send(&mut self, message: &ControlMessage) -> Result<(), ControlError>;

    /// Block until one complete message is available.
    async fn receive(&mut self) -> Result<ControlMessage, ControlError>;

    /// Close the sending side. Calling it twice is harmless.
    async fn close(&mut self) -> Result<(), ControlError>;

    /// Human-readable description of the remote end, for logging.
    fn peer(&self) -> String;
}

/// TCP implementation of the control channel
pub struct TcpControlChannel {
    stream: BufReader<TcpStream>,
    format: WireFormat,
    peer: SocketAddr,
    closed: bool,
}

impl TcpControlChannel {
    /// Connect to a Controller.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        format: WireFormat,
    ) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(addr).await?;
        let channel = Self::from_stream(stream, format)?;
        debug!("Control channel connected to {}", channel.peer);
        Ok(channel)
    }

    /// Wrap an already established stream.
    pub fn from_stream(stream: TcpStream, format: WireFormat) -> Result<Self, ControlError> {
        // Control messages are tiny and latency-sensitive
        let socket = socket2::SockRef::from(&stream);
        socket.set_nodelay(true)?;
        socket.set_keepalive(true)?;

        let peer = stream.peer_addr()?;
        Ok(Self {
            stream: BufReader::new(stream),
            format,
            peer,
            closed: false,
        })
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, ControlError> {
        if self.format.is_line_delimited() {
            let mut line = Vec::new();
            let n = self.stream.read_until(b'\n', &mut line).await?;
            if n == 0 || line.last() != Some(&b'\n') {
                // EOF, or EOF in the middle of a message
                return Err(ControlError::ConnectionClosed);
            }
            Ok(line)
        } else {
            let available = self.stream.fill_buf().await?;
            if available.is_empty() {
                return Err(ControlError::ConnectionClosed);
            }
            let len = available.len().min(MAX_MESSAGE_LEN);
            let frame = available[..len].to_vec();
            self.stream.consume(len);
            Ok(frame)
        }
    }
}

#[async_trait]
impl ControlChannel for TcpControlChannel {
    async fn send(&mut self, message: &ControlMessage) -> Result<(), ControlError> {
        if self.closed {
            return Err(ControlError::ConnectionClosed);
        }
        let bytes = self.format.encode(message)?;
        let stream = self.stream.get_mut();
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        trace!("-> {} : {}", self.peer, message);
        Ok(())
    }

    async fn receive(&mut self) -> Result<ControlMessage, ControlError> {
        let frame = self.read_frame().await?;
        let message = self.format.decode(&frame)?;
        trace!("<- {} : {}", self.peer, message);
        Ok(message)
    }

    async fn close(&mut self) -> Result<(), ControlError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.get_mut().shutdown().await {
            Ok(()) => {}
            // The peer may already have torn the connection down
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }
        debug!("Control channel to {} closed", self.peer);
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

/// Listening side of the control connection (Controller host).
pub struct ControlListener {
    listener: TcpListener,
    format: WireFormat,
}

impl ControlListener {
    pub async fn bind<A: ToSocketAddrs>(addr: A, format: WireFormat) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(addr).await?;
        debug!("Control listener bound to {}", listener.local_addr()?);
        Ok(Self { listener, format })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControlError> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the Driver to connect.
    pub async fn accept(&self) -> Result<TcpControlChannel, ControlError> {
        let (stream, addr) = self.listener.accept().await?;
        debug!("Accepted control connection from {}", addr);
        TcpControlChannel::from_stream(stream, self.format)
    }
}

/// In-process endpoint of a connected channel pair
pub struct MemoryChannel {
    name: &'static str,
    format: WireFormat,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryChannel {
    /// Create two connected endpoints: `(driver side, controller side)`.
    pub fn pair(format: WireFormat) -> (MemoryChannel, MemoryChannel) {
        let (driver_tx, controller_rx) = mpsc::unbounded_channel();
        let (controller_tx, driver_rx) = mpsc::unbounded_channel();
        (
            MemoryChannel {
                name: "memory:controller",
                format,
                tx: Some(driver_tx),
                rx: driver_rx,
            },
            MemoryChannel {
                name: "memory:driver",
                format,
                tx: Some(controller_tx),
                rx: controller_rx,
            },
        )
    }
}

#[async_trait]
impl ControlChannel for MemoryChannel {
    async fn send(&mut self, message: &ControlMessage) -> Result<(), ControlError> {
        let tx = self.tx.as_ref().ok_or(ControlError::ConnectionClosed)?;
        let frame = self.format.encode(message)?;
        tx.send(frame).map_err(|_| ControlError::ConnectionClosed)
    }

    async fn receive(&mut self) -> Result<ControlMessage, ControlError> {
        let frame = self.rx.recv().await.ok_or(ControlError::ConnectionClosed)?;
        self.format.decode(&frame)
    }

    async fn close(&mut self) -> Result<(), ControlError> {
        self.tx = None;
        Ok(())
    }

    fn peer(&self) -> String {
        self.name.to_string()
    }
}
