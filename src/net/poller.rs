//! Completion facility. Readiness from the OS poller and engine-posted
//! entries flow through a single FIFO queue that the pump drains under a
//! per-tick budget, so synchronously finished operations and kernel
//! completions are dispatched the same way.

use crate::entity::EntityId;
use crate::logging::{self, Logger};
use hashbrown::HashMap;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

const EVENT_CAPACITY: usize = 1024;

/// Which side of the socket a completion entry refers to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    Read,
    Write,
}

/// One entry in the completion queue.
#[derive(Debug, Copy, Clone)]
pub struct Completion {
    pub token: Token,
    pub dir: Direction,
}

/// The socket class behind a token.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpKind {
    Listen,
    Stream,
}

/// Weak back-reference from an outstanding operation to its owner. The
/// socket itself stays owned by the record; the pump resolves the token
/// through this table and discards entries whose owner is gone.
#[derive(Debug, Copy, Clone)]
pub struct OpRef {
    pub entity: EntityId,
    pub kind: OpKind,
}

/// Single-threaded completion port: one OS poller, one operation table,
/// one pending queue. Read and written only by the event pump and by
/// records arming operations.
pub struct CompletionPort {
    poll: Poll,
    events: Events,
    ops: HashMap<Token, OpRef>,
    pending: VecDeque<Completion>,
    next_token: usize,
    log: Logger,
}

impl CompletionPort {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(log: L) -> io::Result<CompletionPort> {
        Ok(CompletionPort {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            ops: HashMap::new(),
            pending: VecDeque::new(),
            next_token: 1,
            log: logging::child(log),
        })
    }

    #[inline]
    fn take_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Registers a listening socket and records its owner.
    pub fn register_listener(
        &mut self,
        socket: &mut TcpListener,
        entity: EntityId,
    ) -> io::Result<Token> {
        let token = self.take_token();

        self.poll
            .registry()
            .register(socket, token, Interest::READABLE)?;
        self.ops.insert(token, OpRef { entity, kind: OpKind::Listen });

        logging::trace!(self.log, "listener registered";
                        "entity" => entity.0, "socket" => token.0);

        Ok(token)
    }

    /// Registers a connection socket for both directions and records its
    /// owner.
    pub fn register_stream(
        &mut self,
        socket: &mut TcpStream,
        entity: EntityId,
    ) -> io::Result<Token> {
        let token = self.take_token();

        self.poll
            .registry()
            .register(socket, token, Interest::READABLE | Interest::WRITABLE)?;
        self.ops.insert(token, OpRef { entity, kind: OpKind::Stream });

        logging::trace!(self.log, "stream registered";
                        "entity" => entity.0, "socket" => token.0);

        Ok(token)
    }

    /// Drops the owner mapping and deregisters the listener. Entries still
    /// queued for the token are discarded at dispatch.
    pub fn forget_listener(&mut self, socket: &mut TcpListener, token: Token) {
        self.ops.remove(&token);
        drop(self.poll.registry().deregister(socket));
    }

    /// Drops the owner mapping and deregisters the stream.
    pub fn forget_stream(&mut self, socket: &mut TcpStream, token: Token) {
        self.ops.remove(&token);
        drop(self.poll.registry().deregister(socket));
    }

    /// Posts an engine-generated completion, the analogue of the OS posting
    /// a completion for a synchronously finished operation.
    #[inline]
    pub fn post(&mut self, token: Token, dir: Direction) {
        self.pending.push_back(Completion { token, dir });
    }

    /// Drains OS readiness with a zero timeout into the pending queue,
    /// one entry per (token, direction).
    pub fn drain_os(&mut self) -> io::Result<()> {
        self.poll
            .poll(&mut self.events, Some(Duration::from_millis(0)))?;

        for event in self.events.iter() {
            let token = event.token();

            if event.is_readable() || event.is_read_closed() {
                self.pending.push_back(Completion { token, dir: Direction::Read });
            }
            if event.is_writable() || event.is_write_closed() {
                self.pending.push_back(Completion { token, dir: Direction::Write });
            }
        }

        Ok(())
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Completion> {
        self.pending.pop_front()
    }

    #[inline]
    pub fn lookup(&self, token: Token) -> Option<OpRef> {
        self.ops.get(&token).copied()
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
