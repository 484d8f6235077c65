//! Connection Handler Module
//!
//! This module drives one client socket from inside the reactor. A
//! connection is never given a thread or a task: it reacts to readiness,
//! does as much work as the socket allows and returns.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Acceptor registers the socket (interest: READABLE)
//!        │
//!        ▼
//! 2. ┌──────────────────────────────────────┐
//!    │  Readable                            │
//!    │   read until WouldBlock              │
//!    │   feed StreamParser                  │
//!    │   each frame -> Processor -> reply   │
//!    │   append reply to write buffer       │
//!    │   try to flush                       │
//!    └───────────┬──────────────────────────┘
//!                │ unsent bytes left?
//!                ▼
//! 3. ┌──────────────────────────────────────┐
//!    │  Writing (READABLE | WRITABLE)       │
//!    │   flush from the sent offset         │
//!    │   drained -> back to READABLE only   │
//!    └───────────┬──────────────────────────┘
//!                │
//!                ▼
//! 4. EOF / I/O error / malformed frame
//!        │
//!        ▼
//! 5. Deregister, ask the reactor to drop the handler
//! ```
//!
//! ## Buffer Management
//!
//! Reads land in a fixed 4 KiB buffer and are copied into the parser, which
//! keeps partial frames across reads. Replies accumulate in a growable write
//! buffer together with an offset of how much has already been sent, so a
//! socket that only takes a few bytes at a time still gets every reply
//! exactly once and in order.

use crate::protocol::{ParseError, RespValue, StreamParser};
use crate::reactor::{Context, Handler, Ready};
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Size of the per-connection read buffer.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Turns one request into one reply.
///
/// This is the seam between the transport and whatever interprets commands.
pub trait Processor {
    fn process(&mut self, request: RespValue) -> RespValue;
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The client sent bytes that are not RESP
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The socket accepted zero bytes
    #[error("Write returned zero bytes")]
    WriteZero,
}

/// Buffers and framing for one client, independent of the socket type.
#[derive(Debug)]
pub struct Connection<T> {
    stream: T,
    read_buf: Box<[u8; READ_BUFFER_SIZE]>,
    write_buf: Vec<u8>,
    /// How much of `write_buf` has been written already
    sent: usize,
    parser: StreamParser,
}

impl<T: Read + Write> Connection<T> {
    /// Wraps a non-blocking stream.
    pub fn new(stream: T, parser_limit: usize) -> Self {
        Self {
            stream,
            read_buf: Box::new([0u8; READ_BUFFER_SIZE]),
            write_buf: Vec::new(),
            sent: 0,
            parser: StreamParser::with_limit(parser_limit),
        }
    }

    /// Reads everything currently available and processes every complete frame.
    ///
    /// Replies are only buffered here; call [`flush`](Self::flush) to send them.
    /// Frames that arrived ahead of a malformed one are still processed before
    /// the parse error is returned.
    pub fn read_and_process<P: Processor>(&mut self, processor: &mut P) -> Result<(), ConnectionError> {
        loop {
            let n = match self.stream.read(&mut self.read_buf[..]) {
                Ok(0) => return Err(ConnectionError::ClientDisconnected),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            trace!(bytes = n, "Read data");

            let fed = self.parser.feed(&self.read_buf[..n]);
            for request in self.parser.take_values() {
                let response = processor.process(request);
                response.serialize_into(&mut self.write_buf);
            }
            fed?;
        }
    }

    /// Writes as much of the pending output as the stream accepts.
    ///
    /// Returns `Ok(())` both when everything was sent and when the stream
    /// would block; check [`has_pending_output`](Self::has_pending_output).
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        while self.sent < self.write_buf.len() {
            match self.stream.write(&self.write_buf[self.sent..]) {
                Ok(0) => return Err(ConnectionError::WriteZero),
                Ok(n) => {
                    self.sent += n;
                    trace!(bytes = n, remaining = self.write_buf.len() - self.sent, "Sent response");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.write_buf.clear();
        self.sent = 0;
        Ok(())
    }

    /// True while some reply bytes have not been written yet.
    pub fn has_pending_output(&self) -> bool {
        self.sent < self.write_buf.len()
    }

    /// The interest set matching the current state.
    pub fn interest(&self) -> Interest {
        if self.has_pending_output() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    pub fn stream(&self) -> &T {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut T {
        &mut self.stream
    }
}

/// A client connection registered with the reactor.
pub struct ConnectionHandler {
    conn: Connection<TcpStream>,
    /// Client's address (for logging)
    addr: SocketAddr,
    token: Token,
    interest: Interest,
}

impl ConnectionHandler {
    /// Creates a handler for a stream already registered as READABLE under `token`.
    pub fn new(stream: TcpStream, addr: SocketAddr, token: Token, parser_limit: usize) -> Self {
        Self {
            conn: Connection::new(stream, parser_limit),
            addr,
            token,
            interest: Interest::READABLE,
        }
    }

    fn on_ready<P: Processor>(&mut self, ready: Ready, cx: &mut Context<'_, P>) -> Result<(), ConnectionError> {
        if ready.readable {
            if let Err(e) = self.conn.read_and_process(cx.state()) {
                // Answer the frames that arrived ahead of the bad bytes
                if matches!(e, ConnectionError::ParseError(_)) {
                    let _ = self.conn.flush();
                }
                return Err(e);
            }
        }
        if ready.writable || self.conn.has_pending_output() {
            self.conn.flush()?;
        }

        let wanted = self.conn.interest();
        if wanted != self.interest {
            cx.registry()
                .reregister(self.conn.stream_mut(), self.token, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }

    fn close<P>(&mut self, cx: &mut Context<'_, P>) {
        if let Err(e) = cx.registry().deregister(self.conn.stream_mut()) {
            debug!(client = %self.addr, error = %e, "Deregister failed");
        }
        cx.remove();
    }
}

impl<P: Processor> Handler<P> for ConnectionHandler {
    fn ready(&mut self, ready: Ready, cx: &mut Context<'_, P>) {
        let Err(e) = self.on_ready(ready, cx) else {
            return;
        };

        match &e {
            ConnectionError::ClientDisconnected => {
                debug!(client = %self.addr, "Client disconnected")
            }
            ConnectionError::IoError(io_err) if io_err.kind() == io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            ConnectionError::ParseError(parse_err) => {
                warn!(client = %self.addr, error = %parse_err, "Malformed input, closing connection")
            }
            _ => warn!(client = %self.addr, error = %e, "Connection error"),
        }
        self.close(cx);
    }
}
