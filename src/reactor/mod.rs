//! Single-Threaded Readiness Reactor
//!
//! Every socket in the server is driven from one [`mio::Poll`] loop. The
//! reactor owns a table of handlers keyed by [`Token`] and hands each ready
//! event to the handler registered under that token.
//!
//! ## One Pass
//!
//! ```text
//!  ┌────────────────────────────────────────────────────────┐
//!  │ 1. drop handlers removed during the previous pass      │
//!  │ 2. poll() until something is ready                     │
//!  │ 3. for each event:                                     │
//!  │      skip if its handler asked to be removed           │
//!  │      handler.ready(Ready, &mut Context)                │
//!  │ 4. insert handlers added during this pass              │
//!  └────────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers never touch the table directly. They go through a [`Context`],
//! which queues insertions and removals so the table is stable while a pass
//! walks it.
//!
//! mio delivers edge-triggered readiness, so a handler has to drain its
//! socket until it reports `WouldBlock` before returning.

use mio::event::Event;
use mio::{Events, Poll, Registry, Token, Waker};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Token reserved for the shutdown waker.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Default number of events fetched per poll.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// What a socket is ready for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    /// Data (or end of stream, or an error) can be read
    pub readable: bool,
    /// Bytes can be written
    pub writable: bool,
}

impl Ready {
    pub fn from_event(event: &Event) -> Self {
        Self {
            // A closed or failed socket is reported through the read path,
            // where the read returns 0 or the error itself.
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable() || event.is_write_closed(),
        }
    }
}

/// A participant in the event loop.
///
/// `S` is the state shared by every handler, lent out mutably for the
/// duration of each callback.
pub trait Handler<S> {
    /// Called when the source registered under this handler's token is ready.
    fn ready(&mut self, ready: Ready, cx: &mut Context<'_, S>);
}

/// The view of the reactor a handler gets during a callback.
pub struct Context<'a, S> {
    token: Token,
    registry: &'a Registry,
    state: &'a mut S,
    next_token: &'a mut usize,
    added: &'a mut Vec<(Token, Box<dyn Handler<S>>)>,
    removed: &'a mut HashSet<Token>,
}

impl<'a, S> Context<'a, S> {
    /// Token of the handler being called.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Registry for registering new sources and changing interest.
    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// The shared state.
    pub fn state(&mut self) -> &mut S {
        self.state
    }

    /// Reserves a fresh token for a source about to be registered.
    pub fn next_token(&mut self) -> Token {
        allocate(self.next_token)
    }

    /// Adds a handler. It starts receiving events after the current pass.
    pub fn add(&mut self, token: Token, handler: Box<dyn Handler<S>>) {
        self.added.push((token, handler));
    }

    /// Asks for the calling handler to be dropped.
    ///
    /// The handler is not called again. It is dropped at the start of the
    /// next pass. The caller is responsible for deregistering its source.
    pub fn remove(&mut self) {
        self.removed.insert(self.token);
    }
}

/// Stops a running reactor from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    stop: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Requests shutdown. The reactor returns from `run` after the current pass.
    pub fn shutdown(&self) -> io::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        self.waker.wake()
    }
}

/// The event loop.
pub struct Reactor<S> {
    poll: Poll,
    events: Events,
    handlers: HashMap<Token, Box<dyn Handler<S>>>,
    next_token: usize,
    added: Vec<(Token, Box<dyn Handler<S>>)>,
    removed: HashSet<Token>,
    waker: Arc<Waker>,
    stop: Arc<AtomicBool>,
}

impl<S> Reactor<S> {
    /// Creates a reactor that fetches up to `event_capacity` events per poll.
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(event_capacity),
            handlers: HashMap::new(),
            next_token: 0,
            added: Vec::new(),
            removed: HashSet::new(),
            waker,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Reserves a fresh token.
    pub fn next_token(&mut self) -> Token {
        allocate(&mut self.next_token)
    }

    /// Adds a handler whose source is already registered under `token`.
    pub fn insert(&mut self, token: Token, handler: Box<dyn Handler<S>>) {
        self.handlers.insert(token, handler);
    }

    /// Number of live handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: Arc::clone(&self.waker),
            stop: Arc::clone(&self.stop),
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Runs passes until a [`ShutdownHandle`] fires.
    pub fn run(&mut self, state: &mut S) -> io::Result<()> {
        while !self.is_stopped() {
            self.turn(state, None)?;
        }
        debug!(handlers = self.handlers.len(), "Reactor stopped");
        Ok(())
    }

    /// Runs one pass, waiting at most `timeout` for readiness.
    ///
    /// An interrupted wait counts as a pass with no events.
    pub fn turn(&mut self, state: &mut S, timeout: Option<Duration>) -> io::Result<()> {
        for token in self.removed.drain() {
            if self.handlers.remove(&token).is_some() {
                trace!(token = token.0, "Handler dropped");
            }
        }

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let registry = self.poll.registry();
        for event in self.events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN || self.removed.contains(&token) {
                continue;
            }
            let Some(handler) = self.handlers.get_mut(&token) else {
                continue;
            };

            let mut cx = Context {
                token,
                registry,
                state: &mut *state,
                next_token: &mut self.next_token,
                added: &mut self.added,
                removed: &mut self.removed,
            };
            handler.ready(Ready::from_event(event), &mut cx);
        }

        for (token, handler) in self.added.drain(..) {
            self.handlers.insert(token, handler);
        }
        Ok(())
    }
}

fn allocate(next: &mut usize) -> Token {
    let token = Token(*next);
    *next += 1;
    if *next == WAKE_TOKEN.0 {
        *next = 0;
    }
    token
}
