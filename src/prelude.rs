pub use crate::config::Config;
pub use crate::entity::{Components, EntityId, Errors, Record};
pub use crate::http::codec::{Method, Request, Response};
pub use crate::http::lifecycle::{
    Cors, ProcessHttp, RedirectState, Redirecting, Redirection, Route, RouteTable,
};
pub use crate::logging::Verbosity;
pub use crate::net::buffer::ByteBuffer;
pub use crate::net::records::{ConnectionConfig, ListenConfig, ReceiveConfig};
pub use crate::world::World;
