//! Scripted transports and collectors shared by the integration tests.
//!
//! The scripted transports never do I/O: they record what tasks asked of
//! them and hand the registered observers back to the test, which then
//! plays transport events by hand.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use netsession_core::{
    CloseCode, InlineContext, Request, Session, SessionBuilder, StreamConnection, StreamObserver,
    StreamTransport, Timeouts, Transport, TransportHandle, TransportObserver,
};

/// One `Transport::start` call.
pub struct Started {
    pub request: Request,
    pub timeouts: Timeouts,
    pub observer: Arc<dyn TransportObserver>,
    pub cancels: Arc<AtomicUsize>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    started: Mutex<Vec<Started>>,
}

struct ScriptedHandle(Arc<AtomicUsize>);

impl TransportHandle for ScriptedHandle {
    fn cancel(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Transport for ScriptedTransport {
    fn start(
        &self,
        request: Request,
        timeouts: Timeouts,
        observer: Arc<dyn TransportObserver>,
    ) -> Box<dyn TransportHandle> {
        let cancels = Arc::new(AtomicUsize::new(0));
        self.started.lock().unwrap().push(Started {
            request,
            timeouts,
            observer,
            cancels: Arc::clone(&cancels),
        });
        Box::new(ScriptedHandle(cancels))
    }
}

impl ScriptedTransport {
    pub fn started(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn observer(&self, index: usize) -> Arc<dyn TransportObserver> {
        Arc::clone(&self.started.lock().unwrap()[index].observer)
    }

    pub fn request(&self, index: usize) -> Request {
        self.started.lock().unwrap()[index].request.clone()
    }

    pub fn timeouts(&self, index: usize) -> Timeouts {
        self.started.lock().unwrap()[index].timeouts
    }

    pub fn cancels(&self, index: usize) -> usize {
        self.started.lock().unwrap()[index].cancels.load(Ordering::SeqCst)
    }
}

/// What a task asked a scripted stream connection to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Binary(Bytes),
    Ping,
    Close(CloseCode, Option<String>),
}

#[derive(Default)]
pub struct ScriptedConnection {
    sent: Mutex<Vec<Sent>>,
}

impl ScriptedConnection {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }
}

struct ConnectionHandle(Arc<ScriptedConnection>);

impl StreamConnection for ConnectionHandle {
    fn send_text(&self, text: String) {
        self.0.record(Sent::Text(text));
    }

    fn send_binary(&self, data: Bytes) {
        self.0.record(Sent::Binary(data));
    }

    fn send_ping(&self) {
        self.0.record(Sent::Ping);
    }

    fn close(&self, code: CloseCode, reason: Option<String>) {
        self.0.record(Sent::Close(code, reason));
    }
}

#[derive(Default)]
pub struct ScriptedStreamTransport {
    connections: Mutex<Vec<(Arc<ScriptedConnection>, Arc<dyn StreamObserver>)>>,
}

impl StreamTransport for ScriptedStreamTransport {
    fn connect(
        &self,
        _request: Request,
        observer: Arc<dyn StreamObserver>,
    ) -> Box<dyn StreamConnection> {
        let connection = Arc::new(ScriptedConnection::default());
        self.connections
            .lock()
            .unwrap()
            .push((Arc::clone(&connection), observer));
        Box::new(ConnectionHandle(connection))
    }
}

impl ScriptedStreamTransport {
    pub fn connected(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn connection(&self, index: usize) -> Arc<ScriptedConnection> {
        Arc::clone(&self.connections.lock().unwrap()[index].0)
    }

    pub fn observer(&self, index: usize) -> Arc<dyn StreamObserver> {
        Arc::clone(&self.connections.lock().unwrap()[index].1)
    }
}

/// A session builder that delivers inline and uses `transport`.
pub fn inline_builder(transport: &Arc<ScriptedTransport>) -> SessionBuilder {
    Session::builder()
        .delivery_context(Arc::new(InlineContext))
        .transport(Arc::clone(transport) as Arc<dyn Transport>)
}

/// Collects every value passed to its sinks.
pub struct Collector<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T: Send + 'static> Collector<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> impl FnOnce(T) + Send + 'static {
        let items = Arc::clone(&self.items);
        move |item| items.lock().unwrap().push(item)
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock().unwrap())
    }
}

/// Paths of `netsession-*.download` files in the temp dir whose contents
/// equal `content`.
pub fn temp_downloads_with(content: &[u8]) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(std::env::temp_dir()) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("netsession-") && name.ends_with(".download"))
        })
        .filter(|path| std::fs::read(path).is_ok_and(|bytes| bytes == content))
        .collect()
}
