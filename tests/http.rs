//! End-to-end HTTP scenarios: routing with a 404 fallback, CORS
//! preflight on a keep-alive connection, and client-side redirect chain
//! detection.

use positron::prelude::*;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

const MAX_TICKS: usize = 500;

fn drive<F>(world: &mut World, mut done: F)
where
    F: FnMut(&World) -> bool,
{
    for _ in 0..MAX_TICKS {
        world.run_once();
        if done(world) {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("Engine did not reach the expected state");
}

fn http_listener(world: &mut World, cors: Cors, table: RouteTable) -> u16 {
    let listener = world.spawn();

    world.attach(
        listener,
        Record::Listen(ListenConfig {
            port: 0,
            on_accept: vec![
                Record::ProcessHttp(ProcessHttp { cors }),
                Record::Routes(table),
            ],
            single_read: true,
        }),
    );

    world.bound_port(listener).expect("Listener must be bound")
}

fn health_table() -> RouteTable {
    RouteTable {
        routes: vec![Route {
            pattern: "/health".to_string(),
            on_match: vec![Record::Response(Response::with_body(200, "ok"))],
        }],
        otherwise: Vec::new(),
    }
}

/// Ticks the world while reading the client side until a full response
/// (terminated header block plus content-length body and trailing CR-LF)
/// has arrived.
fn exchange(world: &mut World, stream: &mut TcpStream, request: &[u8]) -> String {
    stream.write_all(request).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(5)))
        .unwrap();

    let mut collected: Vec<u8> = Vec::new();

    for _ in 0..MAX_TICKS {
        world.run_once();

        let mut buf = [0u8; 4096];
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(count) => collected.extend_from_slice(&buf[..count]),
            Err(ref err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => panic!("Client read failed: {}", err),
        }

        if response_complete(&collected) {
            return String::from_utf8_lossy(&collected).into_owned();
        }
    }

    panic!(
        "No complete response; got {:?}",
        String::from_utf8_lossy(&collected)
    );
}

fn response_complete(collected: &[u8]) -> bool {
    let text = String::from_utf8_lossy(collected);
    let header_end = match text.find("\r\n\r\n") {
        Some(pos) => pos + 4,
        None => return false,
    };

    let content_length = text
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, ':');
            let name = parts.next()?.trim();
            let value = parts.next()?.trim();
            match name.eq_ignore_ascii_case("content-length") {
                true => value.parse::<usize>().ok(),
                _ => None,
            }
        })
        .next()
        .unwrap_or(0);

    collected.len() >= header_end + content_length + 2
}

/// E3: unrouted GET yields a 404 carrying the minimum default headers.
#[test]
fn get_unknown_path_is_404() {
    let mut world = World::new(Config::default(), None).unwrap();
    let port = http_listener(&mut world, Cors::default(), health_table());

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let response = exchange(&mut world, &mut client, b"GET / HTTP/1.0\r\n\r\n");

    assert!(response.starts_with("HTTP/1.0 404 Not Found\r\n"));
    assert!(response.contains("Date: "));
    assert!(response.contains("Content-Length: 0\r\n"));
    assert!(response.contains("Connection: keep-alive\r\n"));
}

/// A routed GET is answered by the route's template response.
#[test]
fn get_routed_path_matches() {
    let mut world = World::new(Config::default(), None).unwrap();
    let port = http_listener(&mut world, Cors::default(), health_table());

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let response = exchange(&mut world, &mut client, b"GET /health HTTP/1.0\r\n\r\n");

    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(response.contains("Content-Length: 2\r\n"));
    assert!(response.ends_with("ok\r\n"));
}

/// E4: an OPTIONS preflight is answered with 204 plus the configured CORS
/// headers, and the connection still serves the following request.
#[test]
fn cors_preflight_then_request() {
    let cors = Cors {
        allow_origin: "*".to_string(),
        allow_methods: "POST, OPTIONS".to_string(),
        allow_headers: "*".to_string(),
        content_type: "application/json".to_string(),
    };

    let mut world = World::new(Config::default(), None).unwrap();
    let port = http_listener(&mut world, cors, health_table());

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();

    let preflight = exchange(
        &mut world,
        &mut client,
        b"OPTIONS / HTTP/1.0\r\nOrigin: https://x\r\n\r\n",
    );

    assert!(preflight.starts_with("HTTP/1.0 204 No Content\r\n"));
    assert!(preflight.contains("Access-Control-Allow-Origin: *\r\n"));
    assert!(preflight.contains("Access-Control-Allow-Methods: POST, OPTIONS\r\n"));
    assert!(preflight.contains("Access-Control-Allow-Headers: *\r\n"));
    assert!(preflight.contains("Content-Type: application/json\r\n"));

    // The receive buffer was cleared and re-armed; the next request on the
    // same connection goes through routing.
    let followup = exchange(&mut world, &mut client, b"GET /health HTTP/1.0\r\n\r\n");

    assert!(followup.starts_with("HTTP/1.0 200 OK\r\n"));
    // Non-OPTIONS responses get the CORS headers merged in.
    assert!(followup.contains("Access-Control-Allow-Origin: *\r\n"));
}

/// Unknown methods are valid, preserved, and routed like any other.
#[test]
fn unknown_method_still_routes() {
    let mut world = World::new(Config::default(), None).unwrap();
    let port = http_listener(&mut world, Cors::default(), health_table());

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let response = exchange(&mut world, &mut client, b"BREW /health HTTP/1.0\r\n\r\n");

    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
}

fn redirecting_table() -> RouteTable {
    let mut moved = Response::new(301);
    moved.set_header("Location", "/a");

    RouteTable {
        routes: vec![
            Route {
                pattern: "/".to_string(),
                on_match: vec![Record::Response(moved.clone())],
            },
            Route {
                pattern: "/a".to_string(),
                on_match: vec![Record::Response(moved)],
            },
        ],
        otherwise: Vec::new(),
    }
}

/// E5: a 301 chain that revisits a location is classified as cyclic on
/// the second response and the on-redirect template is not applied.
#[test]
fn redirect_chain_detects_cycle() {
    let mut world = World::new(Config::default(), None).unwrap();
    let port = http_listener(&mut world, Cors::default(), redirecting_table());

    let client = world.spawn();
    world.attach(
        client,
        Record::Connection(ConnectionConfig {
            remote_host: "127.0.0.1".to_string(),
            remote_port: port,
        }),
    );
    world.attach(client, Record::ProcessHttp(ProcessHttp::default()));
    world.attach(
        client,
        Record::Redirecting(Redirecting {
            visited: Vec::new(),
            on_redirect: vec![Record::Connected],
        }),
    );
    world.attach(
        client,
        Record::Receive(ReceiveConfig {
            single_read: true,
            ..ReceiveConfig::default()
        }),
    );
    world.attach(client, Record::Send(ByteBuffer::from("GET / HTTP/1.0\r\n\r\n")));

    drive(&mut world, |world| {
        world
            .components(client)
            .map_or(false, |comps| comps.redirection.is_some())
    });

    {
        let comps = world.components(client).unwrap();
        let redirection = comps.redirection.as_ref().unwrap();
        assert_eq!(redirection.url, "/a");
        assert_eq!(redirection.state, RedirectState::Ok);

        let redirecting = comps.redirecting.as_ref().unwrap();
        assert_eq!(redirecting.visited, vec!["/a".to_string()]);
    }

    // Follow the redirect: same connection, next request to /a.
    world.components_mut(client).unwrap().redirection = None;
    world.attach(
        client,
        Record::Receive(ReceiveConfig {
            single_read: true,
            ..ReceiveConfig::default()
        }),
    );
    world.attach(
        client,
        Record::Send(ByteBuffer::from("GET /a HTTP/1.0\r\n\r\n")),
    );

    drive(&mut world, |world| {
        world
            .components(client)
            .map_or(false, |comps| comps.redirection.is_some())
    });

    let comps = world.components(client).unwrap();
    let redirection = comps.redirection.as_ref().unwrap();
    assert_eq!(redirection.url, "/a");
    assert_eq!(redirection.state, RedirectState::Cyclic);
    assert_eq!(
        comps.redirecting.as_ref().unwrap().visited,
        vec!["/a".to_string(), "/a".to_string()]
    );
}
