//! The engine root: entity table, completion port, configuration and the
//! tick driver. Attaching a declarative `Record` materializes its stateful
//! side and may initiate socket operations; deleting an entity tears its
//! records down in reverse attach order.

use crate::config::Config;
use crate::entity::{Components, EntityId, Record, RecordKind};
use crate::http::lifecycle;
use crate::logging::{self, Logger};
use crate::net::poller::{CompletionPort, Direction};
use crate::net::pump;
use crate::net::records::{ConnectionRecord, ListenRecord, ReceiveRecord, SendRecord};
use hashbrown::HashMap;
use std::io;
use std::net::Shutdown;

pub struct World {
    pub(crate) entities: HashMap<EntityId, Components>,
    pub(crate) port: CompletionPort,
    pub(crate) config: Config,
    pub(crate) log: Logger,
    counter: usize,
}

impl World {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(config: Config, log: L) -> io::Result<World> {
        let world_log = logging::child(log);
        let port = CompletionPort::new(&world_log)?;

        Ok(World {
            entities: HashMap::new(),
            port,
            config,
            log: world_log,
            counter: 0,
        })
    }

    /// Creates an empty entity.
    pub fn spawn(&mut self) -> EntityId {
        let id = EntityId(self.counter);
        self.counter += 1;
        self.entities.insert(id, Components::new());

        logging::trace!(self.log, "entity spawned"; "entity" => id.0);

        id
    }

    #[inline]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    #[inline]
    pub fn components(&self, entity: EntityId) -> Option<&Components> {
        self.entities.get(&entity)
    }

    #[inline]
    pub fn components_mut(&mut self, entity: EntityId) -> Option<&mut Components> {
        self.entities.get_mut(&entity)
    }

    /// Iterates all live entities with their records.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Components)> {
        self.entities.iter().map(|(id, comps)| (*id, comps))
    }

    /// Entity ids in creation order.
    pub(crate) fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort();
        ids
    }

    /// The port a listener entity actually bound (useful with port 0).
    pub fn bound_port(&self, entity: EntityId) -> Option<u16> {
        self.components(entity)
            .and_then(|comps| comps.listen.as_ref())
            .map(|listen| listen.port)
    }

    /// Attaches a record to the entity, materializing sockets and arming
    /// operations as the record class requires.
    pub fn attach(&mut self, entity: EntityId, record: Record) {
        if !self.entities.contains_key(&entity) {
            panic!("Attach on unknown entity {}", entity);
        }

        match record {
            Record::Listen(config) => self.attach_listen(entity, config),
            Record::Connection(config) => {
                let comps = self.entities.get_mut(&entity).expect("Entity checked above");
                comps.connection = Some(ConnectionRecord::outbound(config));
                comps.note_attach(RecordKind::Connection);
            }
            Record::Receive(config) => self.attach_receive(entity, config),
            Record::Send(payload) => self.attach_send(entity, payload),
            Record::ProcessHttp(process) => {
                self.entities.get_mut(&entity).unwrap().process_http = Some(process);
            }
            Record::Routes(table) => {
                self.entities.get_mut(&entity).unwrap().routes = Some(table);
            }
            Record::Redirecting(redirecting) => {
                self.entities.get_mut(&entity).unwrap().redirecting = Some(redirecting);
            }
            Record::Redirection(redirection) => {
                self.entities.get_mut(&entity).unwrap().redirection = Some(redirection);
            }
            Record::Request(request) => {
                self.entities.get_mut(&entity).unwrap().request = Some(request);
            }
            Record::Response(response) => {
                self.entities.get_mut(&entity).unwrap().response = Some(response);
            }
            Record::Connected => self.entities.get_mut(&entity).unwrap().connected = true,
            Record::ReceiveComplete => {
                self.entities.get_mut(&entity).unwrap().receive_complete = true;
            }
            Record::SendComplete => {
                self.entities.get_mut(&entity).unwrap().send_complete = true;
            }
            Record::ResponseSent => {
                self.entities.get_mut(&entity).unwrap().response_sent = true;
            }
        }
    }

    fn attach_listen(&mut self, entity: EntityId, config: crate::net::records::ListenConfig) {
        let fail_fast = self.config.fail_fast;

        {
            let comps = self.entities.get_mut(&entity).expect("Entity checked above");
            if comps.listen.is_some() {
                panic!("Listener already attached to entity {}", entity);
            }
        }

        match ListenRecord::open(config, entity, &mut self.port) {
            Ok(listen) => {
                logging::info!(self.log, "* listening";
                               "entity" => entity.0,
                               "socket" => listen.token.0,
                               "port" => listen.port);

                let comps = self.entities.get_mut(&entity).expect("Entity checked above");
                comps.listen = Some(listen);
                comps.note_attach(RecordKind::Listen);
            }
            Err(err) => {
                let comps = self.entities.get_mut(&entity).expect("Entity checked above");
                comps.surface_error(format!("listen failed: {:?}", err), fail_fast);
            }
        }
    }

    fn attach_receive(&mut self, entity: EntityId, config: crate::net::records::ReceiveConfig) {
        let default_size = self.config.read_buffer_size;

        let armed_token = {
            let comps = self.entities.get_mut(&entity).expect("Entity checked above");

            if let Some(existing) = comps.receive.as_ref() {
                if existing.state == crate::net::records::OpState::Receiving {
                    panic!("Attempted to arm a receive that is already in flight");
                }
            }

            let fresh = comps.receive.is_none();
            let mut receive = ReceiveRecord::new(config, default_size);

            let token = comps.connection.as_ref().and_then(|connection| {
                connection.socket.as_ref().and(connection.token)
            });

            if token.is_some() {
                receive.arm();
            }

            comps.receive = Some(receive);
            if fresh {
                comps.note_attach(RecordKind::Receive);
            }

            token
        };

        if let Some(token) = armed_token {
            self.port.post(token, Direction::Read);
        }
    }

    fn attach_send(&mut self, entity: EntityId, payload: crate::net::buffer::ByteBuffer) {
        let (connected, token) = {
            let comps = self.entities.get_mut(&entity).expect("Entity checked above");

            let (connected, token) = match comps.connection.as_ref() {
                Some(connection) => (connection.socket.is_some(), connection.token),
                None => panic!("Send record requires a connection on entity {}", entity),
            };

            if comps.send.as_ref().map_or(false, SendRecord::in_flight) {
                panic!("Attempted to initiate a send that is already in flight");
            }

            let fresh = comps.send.is_none();
            comps.send = Some(SendRecord::new(payload));
            if fresh {
                comps.note_attach(RecordKind::Send);
            }

            (connected, token)
        };

        if connected {
            let token = token.expect("Live socket must be registered");
            {
                let comps = self.entities.get_mut(&entity).expect("Entity checked above");
                let send = comps.send.as_mut().expect("Send record attached above");
                send.initiate();
            }
            pump::begin_send(self, entity, token);
        } else {
            pump::start_connect(self, entity);
        }
    }

    /// Deletes the entity, tearing its stateful records down in reverse
    /// attach order. Safe to call for ids that are already gone.
    pub fn delete(&mut self, entity: EntityId) {
        let mut comps = match self.entities.remove(&entity) {
            Some(comps) => comps,
            None => return,
        };

        let order: Vec<RecordKind> = comps.attach_order.drain(..).rev().collect();

        for kind in order {
            match kind {
                RecordKind::Send => {
                    if let Some(socket) = comps.connection.as_ref().and_then(|c| c.socket.as_ref())
                    {
                        drop(socket.shutdown(Shutdown::Write));
                    }
                    comps.send = None;
                }
                RecordKind::Receive => {
                    if let Some(socket) = comps.connection.as_ref().and_then(|c| c.socket.as_ref())
                    {
                        drop(socket.shutdown(Shutdown::Read));
                    }
                    comps.receive = None;
                }
                RecordKind::Connection => {
                    if let Some(connection) = comps.connection.take() {
                        connection.close(&mut self.port);
                    }
                }
                RecordKind::Listen => {
                    if let Some(listen) = comps.listen.take() {
                        listen.close(&mut self.port);
                    }
                }
            }
        }

        logging::debug!(self.log, "entity deleted"; "entity" => entity.0);
    }

    /// One tick: the event pump first, then the HTTP sub-steps in fixed
    /// order. All progress happens here; nothing blocks.
    pub fn run_once(&mut self) {
        pump::run(self);
        lifecycle::parse_step(self);
        lifecycle::route_step(self);
        lifecycle::respond_step(self);
        lifecycle::finalize_step(self);
        lifecycle::redirect_step(self);
    }
}
