//! Listening socket handler.

use crate::connection::{ConnectionHandler, Processor};
use crate::reactor::{Context, Handler, Ready};
use mio::net::TcpListener;
use mio::Interest;
use std::io;
use tracing::{debug, error, warn};

/// Accepts clients and registers a [`ConnectionHandler`] for each.
pub struct Acceptor {
    listener: TcpListener,
    parser_limit: usize,
}

impl Acceptor {
    /// Wraps a listener already registered as READABLE.
    pub fn new(listener: TcpListener, parser_limit: usize) -> Self {
        Self {
            listener,
            parser_limit,
        }
    }
}

impl<P: Processor> Handler<P> for Acceptor {
    fn ready(&mut self, _ready: Ready, cx: &mut Context<'_, P>) {
        loop {
            let (mut stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    return;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
            }

            let token = cx.next_token();
            if let Err(e) = cx.registry().register(&mut stream, token, Interest::READABLE) {
                error!(client = %addr, error = %e, "Failed to register connection");
                continue;
            }

            debug!(client = %addr, token = token.0, "Client connected");
            let handler = ConnectionHandler::new(stream, addr, token, self.parser_limit);
            cx.add(token, Box::new(handler));
        }
    }
}
