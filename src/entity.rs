//! Entity identity and the per-entity record slots. Records compose
//! behavior: stateful ones live in option slots, zero-byte markers are
//! presence bits, and the cloneable `Record` declarations are what users
//! (and templates) attach.

use crate::http::codec::{Request, Response};
use crate::http::lifecycle::{ProcessHttp, Redirecting, Redirection, RouteTable};
use crate::net::buffer::ByteBuffer;
use crate::net::records::{
    ConnectionConfig, ConnectionRecord, ListenConfig, ListenRecord, ReceiveConfig, ReceiveRecord,
    SendRecord,
};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntityId(pub usize);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stateful record classes, tracked in attach order so deletion can tear
/// them down in reverse.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    Listen,
    Connection,
    Receive,
    Send,
}

/// Failure messages surfaced on an entity. Created on the first fatal
/// error; the user layer reads and clears it.
#[derive(Clone, Debug, Default)]
pub struct Errors {
    pub messages: Vec<String>,
}

/// A declarative record value. Attaching one through the world
/// materializes the stateful side (sockets, armed operations) and runs the
/// attach behavior the transport defines for it. Cloneable so listener
/// on-accept lists and route templates can stamp copies onto entities.
#[derive(Clone, Debug)]
pub enum Record {
    Listen(ListenConfig),
    Connection(ConnectionConfig),
    Receive(ReceiveConfig),
    Send(ByteBuffer),
    ProcessHttp(ProcessHttp),
    Routes(RouteTable),
    Redirecting(Redirecting),
    Redirection(Redirection),
    Request(Request),
    Response(Response),
    Connected,
    ReceiveComplete,
    SendComplete,
    ResponseSent,
}

/// The record slots of one entity.
pub struct Components {
    pub listen: Option<ListenRecord>,
    pub connection: Option<ConnectionRecord>,
    pub receive: Option<ReceiveRecord>,
    pub send: Option<SendRecord>,

    pub connected: bool,
    pub receive_complete: bool,
    pub send_complete: bool,
    pub response_sent: bool,

    pub process_http: Option<ProcessHttp>,
    pub request: Option<Request>,
    pub response: Option<Response>,
    pub routes: Option<RouteTable>,
    pub redirecting: Option<Redirecting>,
    pub redirection: Option<Redirection>,
    pub errors: Option<Errors>,

    pub(crate) attach_order: Vec<RecordKind>,
}

impl Components {
    pub fn new() -> Components {
        Components {
            listen: None,
            connection: None,
            receive: None,
            send: None,
            connected: false,
            receive_complete: false,
            send_complete: false,
            response_sent: false,
            process_http: None,
            request: None,
            response: None,
            routes: None,
            redirecting: None,
            redirection: None,
            errors: None,
            attach_order: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn note_attach(&mut self, kind: RecordKind) {
        self.attach_order.push(kind);
    }

    /// Appends a failure message, creating the errors record on demand.
    /// With `fail_fast` the message panics instead of accumulating.
    pub fn surface_error(&mut self, message: String, fail_fast: bool) {
        if fail_fast {
            panic!("{}", message);
        }

        self.errors
            .get_or_insert_with(Errors::default)
            .messages
            .push(message);
    }
}
