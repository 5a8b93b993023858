//! The asynchronous TCP transport: buffer primitive, completion port,
//! state-bearing records and the event pump that drives them.

pub mod buffer;
pub mod poller;
pub mod records;
pub mod support;

pub(crate) mod pump;
