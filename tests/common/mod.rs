#![allow(dead_code)]

use sockrpc::wire::packet::DecodedPacket;
use sockrpc::wire::{NetStringParser, PacketDecoder, assemble_response};
use sockrpc::{DirectoryLocator, Engine, RequestHandle, ServiceKey};

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

pub const ECHO_KEY: &str = "system.echo.0.raw";

/// Fault code the echo service answers with for `echo.fault`.
pub const ECHO_FAULT: i32 = 111;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An echo service listening in a private directory.
///
/// Context keys it understands:
/// - `echo.sleepMS`: sleep that long before replying
/// - `echo.fault`: reply with fault [`ECHO_FAULT`] and the value as text
/// - `echo.close`: close the connection without replying
/// - `echo.closeFirst`: close without replying while the shared close budget lasts
///
/// Requests marked noWait are closed without a reply.
pub struct EchoService {
    dir: TempDir,
    pub path: PathBuf,
    connections: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    close_budget: Arc<AtomicUsize>,
}

impl EchoService {
    pub fn start() -> Self {
        Self::start_with_key(ECHO_KEY)
    }

    pub fn start_with_key(key: &str) -> Self {
        init_tracing();

        let dir = tempfile::tempdir().expect("tempdir");
        let key = ServiceKey::parse_service(key).expect("service key");
        let path = DirectoryLocator::new(dir.path()).path_for(&key);
        let listener = UnixListener::bind(&path).expect("bind echo service");

        let service = Self {
            dir,
            path,
            connections: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
            close_budget: Arc::new(AtomicUsize::new(0)),
        };

        let connections = service.connections.clone();
        let requests = service.requests.clone();
        let close_budget = service.close_budget.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                connections.fetch_add(1, Ordering::SeqCst);

                let requests = requests.clone();
                let close_budget = close_budget.clone();
                thread::spawn(move || serve(stream, requests, close_budget));
            }
        });

        service
    }

    pub fn dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn locator(&self) -> DirectoryLocator {
        DirectoryLocator::new(self.dir.path())
    }

    pub fn engine(&self) -> Engine {
        Engine::builder().locator(self.locator()).build()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Complete requests received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Lets the next `count` requests carrying `echo.closeFirst` be dropped.
    pub fn set_close_budget(&self, count: usize) {
        self.close_budget.store(count, Ordering::SeqCst);
    }
}

fn serve(mut stream: UnixStream, requests: Arc<AtomicUsize>, close_budget: Arc<AtomicUsize>) {
    let mut buffer = Vec::new();

    loop {
        let Some(packet) = read_request(&mut stream, &mut buffer) else {
            return;
        };
        requests.fetch_add(1, Ordering::SeqCst);

        let context = &packet.context;
        if let Some(ms) = context.get("echo.sleepMS").and_then(|v| v.parse::<u64>().ok()) {
            thread::sleep(Duration::from_millis(ms));
        }
        if context.get("echo.close").is_some() {
            return;
        }
        if context.get("echo.closeFirst").is_some()
            && close_budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return;
        }
        if packet.attributes.contains(sockrpc::Attributes::NO_WAIT) {
            return;
        }

        let payload = buffer[packet.data.clone()].to_vec();
        let fault = context.get("echo.fault").map(|text| (ECHO_FAULT, text));
        let response = assemble_response(&packet, "echo-service", fault, &payload);
        if stream.write_all(&response).is_err() {
            return;
        }

        buffer.clear();
    }
}

/// Reads one complete request frame. `None` at end of stream.
fn read_request(stream: &mut UnixStream, buffer: &mut Vec<u8>) -> Option<DecodedPacket> {
    let mut parser = NetStringParser::new();
    let mut decoder = PacketDecoder::request();
    let mut chunk = [0u8; 4096];

    loop {
        while let Some(ns) = parser.next(buffer).ok()? {
            decoder.add(&ns, buffer).ok()?;
            if decoder.is_complete() {
                return Some(decoder.into_packet());
            }
        }

        let read = stream.read(&mut chunk).ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

/// Creates a request carrying `payload` and the given context entries.
pub fn echo_request(engine: &Engine, payload: &str, context: &[(&str, &str)]) -> RequestHandle {
    let handle = engine.create_request();
    engine
        .with_request(handle, |request| {
            request.set_payload(payload.as_bytes().to_vec());
            for (key, value) in context {
                request.set_context(key, value).expect("context");
            }
        })
        .expect("request is with caller");
    handle
}

pub fn response_text(engine: &Engine, handle: RequestHandle) -> String {
    engine
        .inspect_request(handle, |request| {
            String::from_utf8_lossy(request.response_data()).into_owned()
        })
        .expect("request exists")
}
