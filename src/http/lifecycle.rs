//! The per-tick HTTP sub-steps layered over the transport: parse incoming
//! data, route requests, serialize and send responses, finish the
//! request/response cycle and track redirects on client entities. Each
//! step runs once per tick, after the event pump.

use crate::entity::{Record, RecordKind};
use crate::http::codec::{Method, Request, Response};
use crate::logging;
use crate::net::poller::Direction;
use crate::net::records::{OpState, SendRecord};
use crate::net::buffer::ByteBuffer;
use crate::world::World;
use serde_derive::{Deserialize, Serialize};

/// Shortest byte sequence that can hold a request line plus terminator.
const MIN_REQUEST_SIZE: usize = 16;

/// CORS policy carried by `ProcessHttp`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cors {
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
    pub content_type: String,
}

impl Default for Cors {
    fn default() -> Cors {
        Cors {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, OPTIONS".to_string(),
            allow_headers: "*".to_string(),
            content_type: "application/json".to_string(),
        }
    }
}

/// Enables the HTTP lifecycle on an entity.
#[derive(Clone, Debug, Default)]
pub struct ProcessHttp {
    pub cors: Cors,
}

#[derive(Clone, Debug)]
pub struct Route {
    pub pattern: String,
    pub on_match: Vec<Record>,
}

/// Ordered path patterns with per-pattern templates and a fallback.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    pub routes: Vec<Route>,
    pub otherwise: Vec<Record>,
}

/// Client-side redirect tracking: previously visited locations plus the
/// records to stamp on when a fresh redirect arrives.
#[derive(Clone, Debug, Default)]
pub struct Redirecting {
    pub visited: Vec<String>,
    pub on_redirect: Vec<Record>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RedirectState {
    Ok,
    Cyclic,
    Empty,
}

/// Outcome of one 301 response under `Redirecting`.
#[derive(Clone, Debug)]
pub struct Redirection {
    pub url: String,
    pub state: RedirectState,
}

/// First case-insensitive match of the URL path (query stripped) wins.
fn match_route<'a>(table: &'a RouteTable, url: &str) -> Option<&'a Route> {
    let path = url.split('?').next().unwrap_or("");

    table
        .routes
        .iter()
        .find(|route| route.pattern.eq_ignore_ascii_case(path))
}

fn classify_redirect(visited: &[String], location: Option<&str>) -> (String, RedirectState) {
    match location {
        None => (String::new(), RedirectState::Empty),
        Some("") => (String::new(), RedirectState::Empty),
        Some(location) => {
            let state = match visited.iter().any(|v| v.eq_ignore_ascii_case(location)) {
                true => RedirectState::Cyclic,
                _ => RedirectState::Ok,
            };
            (location.to_string(), state)
        }
    }
}

fn cors_headers(response: &mut Response, cors: &Cors) {
    response.set_header_if_absent("Access-Control-Allow-Origin", &cors.allow_origin);
    response.set_header_if_absent("Access-Control-Allow-Methods", &cors.allow_methods);
    response.set_header_if_absent("Access-Control-Allow-Headers", &cors.allow_headers);
    response.set_header_if_absent("Content-Type", &cors.content_type);
}

/// Parses completed receives on HTTP entities. Inbound data starting with
/// `HTTP/` is a response (client side); anything else is a request. An
/// OPTIONS request short-circuits into a CORS preflight response.
pub(crate) fn parse_step(world: &mut World) {
    let fail_fast = world.config.fail_fast;

    for id in world.entity_ids() {
        let comps = match world.entities.get_mut(&id) {
            Some(comps) => comps,
            None => continue,
        };

        if comps.process_http.is_none() || !comps.receive_complete {
            continue;
        }

        let receive = match comps.receive.as_mut() {
            Some(receive) => receive,
            None => continue,
        };
        if receive.data.len() < MIN_REQUEST_SIZE {
            continue;
        }

        comps.receive_complete = false;

        if receive.data.as_slice().starts_with(b"HTTP/") {
            match Response::parse(&receive.data) {
                Ok(mut response) => {
                    response.inbound = true;

                    logging::debug!(world.log, "< parsed response";
                                    "entity" => id.0, "status" => response.status);

                    comps.response = Some(response);
                }
                Err(err) => {
                    comps.surface_error(format!("response parse failed: {}", err), fail_fast)
                }
            }
        } else {
            match Request::parse(&receive.data) {
                Ok(request) => {
                    logging::debug!(world.log, "< parsed request";
                                    "entity" => id.0,
                                    "method" => request.method.as_str(),
                                    "url" => %request.url);

                    if request.method == Method::Options {
                        // CORS preflight: answer directly, keep the
                        // connection open for the real request.
                        let cors = comps.process_http.as_ref().map(|p| p.cors.clone());
                        let mut preflight = Response::new(204);
                        if let Some(cors) = cors {
                            cors_headers(&mut preflight, &cors);
                        }
                        comps.response = Some(preflight);
                    } else {
                        comps.request = Some(request);
                    }
                }
                Err(err) => {
                    comps.surface_error(format!("request parse failed: {}", err), fail_fast)
                }
            }
        }

        let receive = comps.receive.as_mut().expect("Receive checked above");
        receive.data.clear();
    }
}

/// Routes freshly parsed requests through the entity's route table.
pub(crate) fn route_step(world: &mut World) {
    for id in world.entity_ids() {
        let template = {
            let comps = match world.entities.get_mut(&id) {
                Some(comps) => comps,
                None => continue,
            };

            let (request, table) = match (comps.request.as_mut(), comps.routes.as_ref()) {
                (Some(request), Some(table)) => (request, table),
                _ => continue,
            };
            if request.routed {
                continue;
            }
            request.routed = true;

            match match_route(table, &request.url) {
                Some(route) => {
                    logging::info!(world.log, "* routed";
                                   "entity" => id.0,
                                   "url" => %request.url,
                                   "pattern" => %route.pattern);
                    route.on_match.clone()
                }
                None if !table.otherwise.is_empty() => table.otherwise.clone(),
                None => {
                    logging::info!(world.log, "* no route";
                                   "entity" => id.0, "url" => %request.url);
                    vec![Record::Response(Response::new(404))]
                }
            }
        };

        for record in template {
            world.attach(id, record);
        }
    }
}

/// Serializes pending outgoing responses and hands them to the sender.
pub(crate) fn respond_step(world: &mut World) {
    for id in world.entity_ids() {
        let token = {
            let comps = match world.entities.get_mut(&id) {
                Some(comps) => comps,
                None => continue,
            };

            let pending = comps
                .response
                .as_ref()
                .map_or(false, |r| !r.inbound && !r.dispatched);
            if !pending {
                continue;
            }

            // A send still in flight defers the response to the next tick.
            if comps.send.as_ref().map_or(false, SendRecord::in_flight) {
                continue;
            }

            let token = match comps.connection.as_ref().and_then(|c| c.token) {
                Some(token) => token,
                None => continue,
            };

            let cors = comps.process_http.as_ref().map(|p| p.cors.clone());
            let response = comps.response.as_mut().expect("Response checked above");

            if let Some(cors) = cors {
                cors_headers(&mut *response, &cors);
            }

            let mut wire = response.serialize();
            response.dispatched = true;

            logging::debug!(world.log, "> response serialized";
                            "entity" => id.0,
                            "status" => response.status,
                            "bytes" => wire.len());

            if comps.send.is_none() {
                comps.send = Some(SendRecord::new(ByteBuffer::new()));
                comps.note_attach(RecordKind::Send);
            }

            let send = comps.send.as_mut().expect("Send record created above");
            send.initiate_transferred(&mut wire);

            token
        };

        crate::net::pump::begin_send(world, id, token);
    }
}

/// Completes the response cycle: promotes `SendComplete` on a dispatched
/// response into `ResponseSent`, and consumes last tick's `ResponseSent`
/// by re-arming the receive for the next request on the connection.
pub(crate) fn finalize_step(world: &mut World) {
    for id in world.entity_ids() {
        let comps = match world.entities.get_mut(&id) {
            Some(comps) => comps,
            None => continue,
        };

        if comps.response_sent {
            comps.response_sent = false;

            if let (Some(receive), Some(connection)) =
                (comps.receive.as_mut(), comps.connection.as_ref())
            {
                if receive.state == OpState::Invalid && connection.socket.is_some() {
                    receive.arm();
                    if let Some(token) = connection.token {
                        world.port.post(token, Direction::Read);
                    }
                }
            }
        }

        let finished = comps.send_complete
            && comps
                .response
                .as_ref()
                .map_or(false, |r| r.dispatched && !r.inbound);

        if finished {
            comps.send_complete = false;
            comps.response = None;
            comps.request = None;
            comps.response_sent = true;

            logging::info!(world.log, "> response sent"; "entity" => id.0);
        }
    }
}

/// Applies redirect tracking to inbound 301 responses on client entities.
pub(crate) fn redirect_step(world: &mut World) {
    for id in world.entity_ids() {
        let template = {
            let comps = match world.entities.get_mut(&id) {
                Some(comps) => comps,
                None => continue,
            };

            let is_redirect = comps.redirecting.is_some()
                && comps
                    .response
                    .as_ref()
                    .map_or(false, |r| r.inbound && r.status == 301);
            if !is_redirect {
                continue;
            }

            let response = comps.response.take().expect("Response checked above");
            let redirecting = comps.redirecting.as_mut().expect("Redirecting checked above");

            let (url, state) = classify_redirect(&redirecting.visited, response.header("location"));

            logging::info!(world.log, "* redirection";
                           "entity" => id.0,
                           "url" => %url,
                           "state" => ?state);

            if !url.is_empty() {
                redirecting.visited.push(url.clone());
            }

            let template = match state {
                RedirectState::Ok if !redirecting.on_redirect.is_empty() => {
                    redirecting.on_redirect.clone()
                }
                _ => Vec::new(),
            };

            comps.redirection = Some(Redirection { url, state });

            template
        };

        for record in template {
            world.attach(id, record);
        }
    }
}
