//! The state-bearing transport records. Attaching their declarative
//! configs (see `entity::Record`) materializes these on the entity; the
//! pump mutates them as completions arrive.

use crate::entity::{EntityId, Record};
use crate::net::buffer::ByteBuffer;
use crate::net::poller::CompletionPort;
use crate::net::support::{classify, ErrorKind, NetworkError, NetworkResult};
use mio::net::{TcpListener, TcpStream};
use mio::Token;
use std::io;
use std::io::Write;
use std::net::{SocketAddr, ToSocketAddrs};

/// Stage of the operation currently outstanding on a record.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpState {
    Invalid,
    Accepting,
    Receiving,
    Connecting,
    Sending,
}

/// Declarative listener: attaching it binds, listens, registers and arms
/// the accept. `on_accept` records are applied to every accepted entity;
/// `single_read` is copied onto each spawned receive record.
#[derive(Clone, Debug, Default)]
pub struct ListenConfig {
    pub port: u16,
    pub on_accept: Vec<Record>,
    pub single_read: bool,
}

pub struct ListenRecord {
    pub port: u16,
    pub socket: TcpListener,
    pub token: Token,
    pub state: OpState,
    pub on_accept: Vec<Record>,
    pub single_read: bool,
    pub accepted: usize,
}

impl ListenRecord {
    /// Creates the listening socket and arms the first accept.
    pub fn open(
        config: ListenConfig,
        entity: EntityId,
        port: &mut CompletionPort,
    ) -> NetworkResult<ListenRecord> {
        let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let mut socket = TcpListener::bind(addr)?;
        let bound = socket.local_addr()?;
        let token = port.register_listener(&mut socket, entity)?;

        Ok(ListenRecord {
            port: bound.port(),
            socket,
            token,
            state: OpState::Accepting,
            on_accept: config.on_accept,
            single_read: config.single_read,
            accepted: 0,
        })
    }

    /// Deregisters and drops the socket.
    pub fn close(mut self, port: &mut CompletionPort) {
        let token = self.token;
        port.forget_listener(&mut self.socket, token);
    }
}

/// Declarative outbound endpoint: the socket stays absent until a send
/// record triggers the connect.
#[derive(Clone, Debug, Default)]
pub struct ConnectionConfig {
    pub remote_host: String,
    pub remote_port: u16,
}

pub struct ConnectionRecord {
    pub socket: Option<TcpStream>,
    pub token: Option<Token>,
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: String,
    pub remote_port: u16,
}

impl ConnectionRecord {
    pub fn outbound(config: ConnectionConfig) -> ConnectionRecord {
        ConnectionRecord {
            socket: None,
            token: None,
            local_address: String::new(),
            local_port: 0,
            remote_address: config.remote_host,
            remote_port: config.remote_port,
        }
    }

    pub fn inbound(
        socket: TcpStream,
        token: Token,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> ConnectionRecord {
        ConnectionRecord {
            socket: Some(socket),
            token: Some(token),
            local_address: local.ip().to_string(),
            local_port: local.port(),
            remote_address: remote.ip().to_string(),
            remote_port: remote.port(),
        }
    }

    /// Fills the address fields from the live socket.
    pub fn populate_addresses(&mut self) -> io::Result<()> {
        let socket = self.socket.as_ref().expect("Connection must have a socket");
        let local = socket.local_addr()?;
        let remote = socket.peer_addr()?;

        self.local_address = local.ip().to_string();
        self.local_port = local.port();
        self.remote_address = remote.ip().to_string();
        self.remote_port = remote.port();

        Ok(())
    }

    /// Shuts down both directions and drops the socket.
    pub fn close(mut self, port: &mut CompletionPort) {
        if let Some(mut socket) = self.socket.take() {
            if let Some(token) = self.token.take() {
                port.forget_stream(&mut socket, token);
            }
            drop(socket.shutdown(std::net::Shutdown::Both));
        }
    }
}

/// Per-receive policy. A `buffer_size` of 0 falls back to the engine
/// default; `max_read_length` of 0 means unbounded; `single_read`
/// completes after the first delivery.
#[derive(Clone, Debug)]
pub struct ReceiveConfig {
    pub buffer_size: usize,
    pub max_read_length: usize,
    pub single_read: bool,
    pub benign: Vec<io::ErrorKind>,
}

impl Default for ReceiveConfig {
    fn default() -> ReceiveConfig {
        ReceiveConfig {
            buffer_size: 0,
            max_read_length: 0,
            single_read: false,
            benign: Vec::new(),
        }
    }
}

pub struct ReceiveRecord {
    pub data: ByteBuffer,
    pub buffer_size: usize,
    pub max_read_length: usize,
    pub single_read: bool,
    pub benign: Vec<io::ErrorKind>,
    pub state: OpState,
    pub bytes_received: usize,
    pub spawned_by: Option<EntityId>,
    staging: Vec<u8>,
}

impl ReceiveRecord {
    pub fn new(config: ReceiveConfig, default_buffer_size: usize) -> ReceiveRecord {
        let buffer_size = match config.buffer_size {
            0 => default_buffer_size,
            size => size,
        };

        ReceiveRecord {
            data: ByteBuffer::new(),
            buffer_size,
            max_read_length: config.max_read_length,
            single_read: config.single_read,
            benign: config.benign,
            state: OpState::Invalid,
            bytes_received: 0,
            spawned_by: None,
            staging: Vec::new(),
        }
    }

    /// Allocates the staging buffer and marks the operation outstanding.
    /// The caller posts the completion entry that drives the first read.
    pub fn arm(&mut self) {
        if self.state == OpState::Receiving {
            panic!("Attempted to arm a receive that is already in flight");
        }

        self.staging.resize(self.buffer_size, 0);
        self.state = OpState::Receiving;
    }

    /// Performs one read attempt, appending delivered bytes to the data
    /// buffer. Returns the number of bytes delivered; 0 signals a graceful
    /// close.
    pub fn deliver(&mut self, socket: &mut TcpStream) -> NetworkResult<usize> {
        use std::io::Read;

        loop {
            match socket.read(&mut self.staging) {
                Ok(0) => return Ok(0),
                Ok(count) => {
                    let offset = self.data.len();
                    self.data.set_length(offset + count);
                    self.data.overwrite(offset, &self.staging[..count]);
                    self.bytes_received += count;
                    return Ok(count);
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return classify(Err(err), &self.benign),
            }
        }
    }
}

/// Outbound data and the operation that carries it. The user payload stays
/// in `data`; each initiated send snapshots it into the wire buffer.
pub struct SendRecord {
    pub data: ByteBuffer,
    pub state: OpState,
    pub bytes_sent: usize,
    pub benign: Vec<io::ErrorKind>,
    pub resolved: Option<SocketAddr>,
    wire: ByteBuffer,
    cursor: usize,
}

impl SendRecord {
    pub fn new(data: ByteBuffer) -> SendRecord {
        SendRecord {
            data,
            state: OpState::Invalid,
            bytes_sent: 0,
            benign: vec![io::ErrorKind::ConnectionReset, io::ErrorKind::TimedOut],
            resolved: None,
            wire: ByteBuffer::new(),
            cursor: 0,
        }
    }

    /// Resolves the remote address to the first IPv4 entry.
    pub fn resolve(&mut self, host: &str, remote_port: u16) -> NetworkResult<SocketAddr> {
        if remote_port == 0 {
            panic!("Connect requires a non-zero remote port");
        }

        let addr = (host, remote_port)
            .to_socket_addrs()
            .map_err(|_| NetworkError::Fatal(ErrorKind::Resolve))?
            .find(SocketAddr::is_ipv4)
            .ok_or(NetworkError::Fatal(ErrorKind::Resolve))?;

        self.resolved = Some(addr);
        Ok(addr)
    }

    /// Snapshots the payload into the wire buffer and marks the operation
    /// outstanding. Initiating while a send is in flight is a contract
    /// violation.
    pub fn initiate(&mut self) {
        if self.state == OpState::Sending {
            panic!("Attempted to initiate a send that is already in flight");
        }

        self.wire.assign(self.data.as_slice());
        self.cursor = 0;
        self.bytes_sent = 0;
        self.state = OpState::Sending;
    }

    /// Accepts a pre-serialized buffer by transfer and initiates.
    pub fn initiate_transferred(&mut self, source: &mut ByteBuffer) {
        if self.state == OpState::Sending {
            panic!("Attempted to initiate a send that is already in flight");
        }

        source.transfer(&mut self.data);
        self.initiate();
    }

    /// Writes as much of the wire buffer as the socket accepts. Returns
    /// true once everything is on the wire.
    pub fn drive(&mut self, socket: &mut TcpStream) -> NetworkResult<bool> {
        while self.cursor < self.wire.len() {
            match socket.write(&self.wire.as_slice()[self.cursor..]) {
                Ok(0) => return Err(NetworkError::Fatal(ErrorKind::WriteZero)),
                Ok(count) => {
                    self.cursor += count;
                    self.bytes_sent += count;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return classify(Err(err), &self.benign),
            }
        }

        Ok(true)
    }

    #[inline]
    pub fn in_flight(&self) -> bool {
        self.state == OpState::Sending || self.state == OpState::Connecting
    }
}
