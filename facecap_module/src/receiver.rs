//! Non-blocking UDP receive loop feeding the decoder.

use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use log::{debug, warn};
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

use crate::protocol::{decode, DecodedFrame};

/// Large enough for any capture frame; longer datagrams are cut and fail to
/// decode.
pub const RECV_BUFFER_LEN: usize = 2048;

const SOCKET: Token = Token(0);
const MAX_RECV_ERRORS: usize = 16;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to create UDP socket: {0}")]
    SocketCreateFailed(#[source] io::Error),
    #[error("failed to bind UDP port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to set non-blocking mode: {0}")]
    NonBlockingSetFailed(#[source] io::Error),
}

struct Io {
    socket: UdpSocket,
    poll: Poll,
}

/// Owns the listening socket and the most recent good frame.
pub struct Receiver {
    io: Option<Io>,
    events: Events,
    buf: Box<[u8; RECV_BUFFER_LEN]>,
    frame: DecodedFrame,
    last_sender: Option<SocketAddr>,
    verbose: bool,
}

impl Receiver {
    /// Binds `0.0.0.0:port` in non-blocking mode.
    ///
    /// Port 0 picks an ephemeral port, see [`Receiver::local_addr`].
    pub fn open(port: u16) -> Result<Self, NetworkError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(NetworkError::SocketCreateFailed)?;
        socket
            .set_nonblocking(true)
            .map_err(NetworkError::NonBlockingSetFailed)?;

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        socket
            .bind(&addr.into())
            .map_err(|source| NetworkError::BindFailed { port, source })?;

        let mut socket = UdpSocket::from_std(socket.into());
        let poll = Poll::new().map_err(NetworkError::SocketCreateFailed)?;
        poll.registry()
            .register(&mut socket, SOCKET, Interest::READABLE)
            .map_err(NetworkError::SocketCreateFailed)?;

        Ok(Self {
            io: Some(Io { socket, poll }),
            events: Events::with_capacity(8),
            buf: Box::new([0u8; RECV_BUFFER_LEN]),
            frame: DecodedFrame::ZERO,
            last_sender: None,
            verbose: false,
        })
    }

    /// Logs every rejected datagram when enabled.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.io.as_ref().and_then(|io| io.socket.local_addr().ok())
    }

    /// Most recently committed frame. Zeroed until the first good datagram.
    pub fn frame(&self) -> &DecodedFrame {
        &self.frame
    }

    /// Sender of the most recently committed frame.
    pub fn last_sender(&self) -> Option<SocketAddr> {
        self.last_sender
    }

    /// Waits up to `timeout` for the socket to become readable, then drains
    /// every queued datagram.
    ///
    /// Returns 1 if at least one datagram decoded during this call, else 0.
    /// Only the last good frame is kept.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        let Some(io) = self.io.as_mut() else {
            return 0;
        };
        if let Err(e) = io.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() != ErrorKind::Interrupted {
                warn!("UDP readiness wait failed: {}", e);
            }
            return 0;
        }
        let readable = self
            .events
            .iter()
            .any(|event| event.token() == SOCKET && event.is_readable());
        if !readable {
            return 0;
        }

        let Some(io) = self.io.take() else {
            return 0;
        };
        let updated = self.drain(|buf| io.socket.recv_from(buf));
        self.io = Some(io);
        updated
    }

    /// Receives until `recv` reports `WouldBlock`, decoding each datagram.
    ///
    /// Readiness is edge-triggered, so a failed receive only drops that one
    /// datagram. More than `MAX_RECV_ERRORS` failures in a row ends the drain.
    fn drain<F>(&mut self, mut recv: F) -> usize
    where
        F: FnMut(&mut [u8]) -> io::Result<(usize, SocketAddr)>,
    {
        let mut updated = 0;
        let mut errors = 0;
        loop {
            self.buf.fill(0);
            match recv(&mut self.buf[..]) {
                Ok((amt, src)) => {
                    errors = 0;
                    debug!("{} bytes received from {}", amt, src);
                    match decode(&self.buf[..amt]) {
                        Ok(frame) => {
                            self.frame = frame;
                            self.last_sender = Some(src);
                            updated = 1;
                        }
                        Err(e) => {
                            if self.verbose {
                                warn!("Dropping datagram from {}: {}", src, e);
                            }
                        }
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    errors += 1;
                    if e.kind() != ErrorKind::Interrupted {
                        warn!("UDP receive error: {}", e);
                    }
                    if errors > MAX_RECV_ERRORS {
                        warn!("Giving up on this drain after {} receive errors", errors);
                        break;
                    }
                }
            }
        }
        updated
    }

    /// Releases the socket. Calling it again does nothing.
    pub fn close(&mut self) {
        self.io = None;
    }
}
