//! The event pump. Once per tick it drains OS readiness into the
//! completion queue and dispatches queued completions in FIFO order up to
//! the configured budget, mutating records and publishing markers on the
//! owning entities. Completions whose owner is gone are discarded.

use crate::entity::{EntityId, RecordKind};
use crate::logging;
use crate::net::poller::{Completion, Direction, OpKind};
use crate::net::records::{OpState, ReceiveConfig, ReceiveRecord};
use crate::net::support::NetworkError;
use crate::world::World;
use mio::net::TcpStream;
use mio::Token;
use std::io;

/// Drains and dispatches completions for one tick. Respects the event
/// budget strictly; the remainder of the queue carries over.
pub(crate) fn run(world: &mut World) {
    if let Err(err) = world.port.drain_os() {
        logging::error!(world.log, "completion drain failed"; "error" => %err);
        return;
    }

    let limit = world.config.event_limit;
    let mut dispatched = 0usize;

    loop {
        if limit != 0 && dispatched == limit {
            break;
        }

        let completion = match world.port.pop() {
            Some(completion) => completion,
            None => break,
        };
        dispatched += 1;

        dispatch(world, completion);
    }

    if dispatched > 0 {
        logging::trace!(world.log, "pump tick";
                        "dispatched" => dispatched,
                        "deferred" => world.port.pending_len());
    }
}

fn dispatch(world: &mut World, completion: Completion) {
    let op = match world.port.lookup(completion.token) {
        Some(op) => op,
        // The owning record is gone; the completion is discarded.
        None => return,
    };

    if !world.entities.contains_key(&op.entity) {
        return;
    }

    match (op.kind, completion.dir) {
        (OpKind::Listen, Direction::Read) => accept(world, op.entity),
        (OpKind::Stream, Direction::Read) => receive(world, op.entity, completion.token),
        (OpKind::Stream, Direction::Write) => write_ready(world, op.entity, completion.token),
        _ => {}
    }
}

/// Accepts one pending connection, manufactures the connection entity and
/// re-arms the accept.
fn accept(world: &mut World, listener: EntityId) {
    let fail_fast = world.config.fail_fast;

    let accepted = {
        let comps = match world.entities.get_mut(&listener) {
            Some(comps) => comps,
            None => return,
        };
        let listen = match comps.listen.as_mut() {
            Some(listen) => listen,
            None => return,
        };
        if listen.state != OpState::Accepting {
            return;
        }

        match listen.socket.accept() {
            Ok((stream, remote)) => {
                listen.accepted += 1;
                Some((
                    stream,
                    remote,
                    listen.single_read,
                    listen.on_accept.clone(),
                    listen.token,
                ))
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => None,
            Err(err) => {
                comps.surface_error(format!("accept failed: {}", err), fail_fast);
                None
            }
        }
    };

    let (mut stream, remote, single_read, template, listen_token) = match accepted {
        Some(accepted) => accepted,
        None => return,
    };

    let local = match stream.local_addr() {
        Ok(local) => local,
        Err(err) => {
            if let Some(comps) = world.entities.get_mut(&listener) {
                comps.surface_error(format!("accept address lookup failed: {}", err), fail_fast);
            }
            return;
        }
    };

    let spawned = world.spawn();
    let token = match world.port.register_stream(&mut stream, spawned) {
        Ok(token) => token,
        Err(err) => {
            world.delete(spawned);
            if let Some(comps) = world.entities.get_mut(&listener) {
                comps.surface_error(format!("accept registration failed: {}", err), fail_fast);
            }
            return;
        }
    };

    {
        let comps = world
            .entities
            .get_mut(&spawned)
            .expect("Spawned entity must exist");

        comps.connection = Some(crate::net::records::ConnectionRecord::inbound(
            stream, token, local, remote,
        ));
        comps.note_attach(RecordKind::Connection);

        let mut receive = ReceiveRecord::new(
            ReceiveConfig {
                single_read,
                ..ReceiveConfig::default()
            },
            world.config.read_buffer_size,
        );
        receive.spawned_by = Some(listener);
        receive.arm();
        comps.receive = Some(receive);
        comps.note_attach(RecordKind::Receive);

        comps.connected = true;
    }

    // The accepted socket may already hold data; attempt the first read.
    world.port.post(token, Direction::Read);

    for record in template {
        world.attach(spawned, record);
    }

    // Re-arm the accept; the chain stops when accept would block.
    world.port.post(listen_token, Direction::Read);

    logging::info!(world.log, "< accepted connection";
                   "entity" => spawned.0,
                   "socket" => token.0,
                   "listener" => listener.0);
    logging::debug!(world.log, "< accepted peer";
                    "entity" => spawned.0,
                    "remote" => %remote);
}

/// Performs one receive delivery and applies the completion rules.
fn receive(world: &mut World, entity: EntityId, token: Token) {
    let fail_fast = world.config.fail_fast;

    let comps = match world.entities.get_mut(&entity) {
        Some(comps) => comps,
        None => return,
    };
    let receive = match comps.receive.as_mut() {
        Some(receive) => receive,
        None => return,
    };
    if receive.state != OpState::Receiving {
        return;
    }
    let socket = match comps.connection.as_mut().and_then(|c| c.socket.as_mut()) {
        Some(socket) => socket,
        None => return,
    };

    match receive.deliver(socket) {
        Ok(0) => {
            // Graceful close by the peer.
            receive.state = OpState::Invalid;
            comps.receive_complete = true;

            logging::info!(world.log, "< receive complete (closed)";
                           "entity" => entity.0, "socket" => token.0);
        }
        Ok(count) => {
            let total = receive.data.len();
            let capped =
                receive.max_read_length > 0 && total >= receive.max_read_length;

            logging::debug!(world.log, "< received data";
                            "entity" => entity.0,
                            "socket" => token.0,
                            "bytes" => count,
                            "total" => total);

            if capped || receive.single_read {
                receive.state = OpState::Invalid;
                comps.receive_complete = true;

                logging::info!(world.log, "< receive complete";
                               "entity" => entity.0, "socket" => token.0);
            } else {
                // Restart on the same socket with the same buffer.
                world.port.post(token, Direction::Read);
            }
        }
        Err(NetworkError::Wait) | Err(NetworkError::Benign(_)) => {}
        Err(NetworkError::Fatal(kind)) => {
            receive.state = OpState::Invalid;
            comps.surface_error(format!("receive failed: {}", kind), fail_fast);
        }
    }
}

/// Writable-side dispatch: finishes connects and continues sends.
fn write_ready(world: &mut World, entity: EntityId, token: Token) {
    let state = match world
        .entities
        .get(&entity)
        .and_then(|comps| comps.send.as_ref())
    {
        Some(send) => send.state,
        None => return,
    };

    match state {
        OpState::Connecting => finish_connect(world, entity, token),
        OpState::Sending => continue_send(world, entity, token),
        _ => {}
    }
}

fn finish_connect(world: &mut World, entity: EntityId, token: Token) {
    let fail_fast = world.config.fail_fast;

    {
        let comps = match world.entities.get_mut(&entity) {
            Some(comps) => comps,
            None => return,
        };

        let connection = match comps.connection.as_mut() {
            Some(connection) => connection,
            None => return,
        };
        let socket = match connection.socket.as_mut() {
            Some(socket) => socket,
            None => return,
        };

        // A connect error surfaces through take_error once the socket
        // signals writable.
        let failure = match socket.take_error() {
            Ok(Some(err)) => Some(err),
            Ok(None) => match socket.peer_addr() {
                Ok(_) => None,
                Err(ref err)
                    if err.kind() == io::ErrorKind::NotConnected
                        || err.kind() == io::ErrorKind::WouldBlock =>
                {
                    // Still connecting; a later completion finishes it.
                    return;
                }
                Err(err) => Some(err),
            },
            Err(err) => Some(err),
        };

        if let Some(err) = failure {
            let mut socket = connection.socket.take().expect("Socket checked above");
            if let Some(token) = connection.token.take() {
                world.port.forget_stream(&mut socket, token);
            }
            drop(socket);

            if let Some(send) = comps.send.as_mut() {
                send.state = OpState::Invalid;
                send.resolved = None;
            }
            comps.surface_error(format!("connect failed: {}", err), fail_fast);
            return;
        }

        if let Err(err) = connection.populate_addresses() {
            comps.surface_error(format!("connect address lookup failed: {}", err), fail_fast);
        }

        comps.connected = true;

        // A receive attached before the connect finished arms now.
        if let Some(receive) = comps.receive.as_mut() {
            if receive.state == OpState::Invalid {
                receive.arm();
                world.port.post(token, Direction::Read);
            }
        }

        logging::info!(world.log, "* connected";
                       "entity" => entity.0, "socket" => token.0);

        // Initiate the send that triggered the connect.
        let send = match comps.send.as_mut() {
            Some(send) => send,
            None => return,
        };
        send.state = OpState::Invalid;
        send.initiate();
    }

    begin_send(world, entity, token);
}

fn continue_send(world: &mut World, entity: EntityId, token: Token) {
    let fail_fast = world.config.fail_fast;

    let comps = match world.entities.get_mut(&entity) {
        Some(comps) => comps,
        None => return,
    };
    let send = match comps.send.as_mut() {
        Some(send) => send,
        None => return,
    };
    if send.state != OpState::Sending {
        return;
    }
    let socket = match comps.connection.as_mut().and_then(|c| c.socket.as_mut()) {
        Some(socket) => socket,
        None => return,
    };

    match send.drive(socket) {
        Ok(true) => {
            send.state = OpState::Invalid;
            comps.send_complete = true;

            logging::info!(world.log, "> send complete";
                           "entity" => entity.0,
                           "socket" => token.0,
                           "bytes" => send.bytes_sent);
        }
        Ok(false) => {}
        Err(NetworkError::Wait) | Err(NetworkError::Benign(_)) => {}
        Err(NetworkError::Fatal(kind)) => {
            send.state = OpState::Invalid;
            comps.surface_error(format!("send failed: {}", kind), fail_fast);
        }
    }
}

/// Drives a freshly initiated send; when the payload fits synchronously a
/// completion is posted so `SendComplete` still flows through the pump.
pub(crate) fn begin_send(world: &mut World, entity: EntityId, token: Token) {
    let fail_fast = world.config.fail_fast;

    let comps = match world.entities.get_mut(&entity) {
        Some(comps) => comps,
        None => return,
    };
    let send = match comps.send.as_mut() {
        Some(send) => send,
        None => return,
    };
    let socket = match comps.connection.as_mut().and_then(|c| c.socket.as_mut()) {
        Some(socket) => socket,
        None => return,
    };

    match send.drive(socket) {
        Ok(true) => world.port.post(token, Direction::Write),
        Ok(false) => {}
        Err(NetworkError::Wait) | Err(NetworkError::Benign(_)) => {}
        Err(NetworkError::Fatal(kind)) => {
            send.state = OpState::Invalid;
            comps.surface_error(format!("send failed: {}", kind), fail_fast);
        }
    }
}

/// Resolves, connects and registers the outbound socket; the payload rides
/// along once the connect completes.
pub(crate) fn start_connect(world: &mut World, entity: EntityId) {
    let fail_fast = world.config.fail_fast;

    let comps = match world.entities.get_mut(&entity) {
        Some(comps) => comps,
        None => return,
    };

    let (host, port) = {
        let connection = comps
            .connection
            .as_ref()
            .expect("Send record requires a connection");
        (connection.remote_address.clone(), connection.remote_port)
    };

    let send = comps.send.as_mut().expect("Connect requires a send record");

    let addr = match send.resolve(&host, port) {
        Ok(addr) => addr,
        Err(_) => {
            comps.surface_error(format!("address resolution failed: {}:{}", host, port), fail_fast);
            return;
        }
    };

    let mut stream = match TcpStream::connect(addr) {
        Ok(stream) => stream,
        Err(err) => {
            comps.surface_error(format!("connect failed: {}", err), fail_fast);
            return;
        }
    };

    let token = match world.port.register_stream(&mut stream, entity) {
        Ok(token) => token,
        Err(err) => {
            comps.surface_error(format!("connect registration failed: {}", err), fail_fast);
            return;
        }
    };

    let connection = comps.connection.as_mut().expect("Connection checked above");
    connection.socket = Some(stream);
    connection.token = Some(token);

    let send = comps.send.as_mut().expect("Send record checked above");
    send.state = OpState::Connecting;

    logging::info!(world.log, "> connecting";
                   "entity" => entity.0,
                   "socket" => token.0,
                   "remote" => %addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::entity::Record;
    use crate::net::records::ListenConfig;

    /// Five completions queued, a budget of two per tick: two dispatched,
    /// three carried over, then two, then one, in order.
    #[test]
    fn test_event_budget_carries_queue_over() {
        let config = Config {
            event_limit: 2,
            ..Config::default()
        };
        let mut world = World::new(config, None).unwrap();

        let listener = world.spawn();
        world.attach(listener, Record::Listen(ListenConfig::default()));

        let token = world
            .components(listener)
            .unwrap()
            .listen
            .as_ref()
            .unwrap()
            .token;

        for _ in 0..5 {
            world.port.post(token, Direction::Read);
        }
        assert_eq!(world.port.pending_len(), 5);

        // Each accept attempt would block, so no new entries are posted.
        run(&mut world);
        assert_eq!(world.port.pending_len(), 3);

        run(&mut world);
        assert_eq!(world.port.pending_len(), 1);

        run(&mut world);
        assert_eq!(world.port.pending_len(), 0);
    }

    /// Completions for a deleted entity are discarded, not dispatched.
    #[test]
    fn test_stale_completion_discarded() {
        let mut world = World::new(Config::default(), None).unwrap();

        let listener = world.spawn();
        world.attach(listener, Record::Listen(ListenConfig::default()));

        let token = world
            .components(listener)
            .unwrap()
            .listen
            .as_ref()
            .unwrap()
            .token;

        world.port.post(token, Direction::Read);
        world.delete(listener);

        run(&mut world);

        assert_eq!(world.port.pending_len(), 0);
        assert!(world.components(listener).is_none());
    }
}
