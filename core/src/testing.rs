//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::engine::{basic_auth_interceptor, Engine, Exchange, Interceptors, Outgoing, Transport};
use crate::entity::Entity;
use crate::error::{RestError, Result};
use crate::http::{Headers, Method};
use crate::request::Request;

/// A canned reply, or a connection failure.
#[derive(Debug, Clone)]
pub(crate) struct Canned {
    status: u16,
    headers: Headers,
    body: Vec<u8>,
    refuse: bool,
}

impl Canned {
    pub(crate) fn status(status: u16) -> Self {
        Canned {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            refuse: false,
        }
    }

    pub(crate) fn ok(body: &str) -> Self {
        Self::ok_bytes(body.as_bytes().to_vec())
    }

    pub(crate) fn ok_bytes(body: Vec<u8>) -> Self {
        Canned {
            body,
            ..Self::status(200)
        }
    }

    pub(crate) fn refused() -> Self {
        Canned {
            refuse: true,
            ..Self::status(0)
        }
    }

    pub(crate) fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Sent {
    pub(crate) method: Method,
    pub(crate) uri: Url,
    pub(crate) headers: Headers,
    pub(crate) body: Option<Vec<u8>>,
}

/// Replies in order, records what was sent. Runs out into `200` with an
/// empty body.
#[derive(Default)]
pub(crate) struct Script {
    replies: Mutex<VecDeque<Canned>>,
    sent: Mutex<Vec<Sent>>,
    resets: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl Script {
    pub(crate) fn new(replies: Vec<Canned>) -> Arc<Self> {
        Arc::new(Script {
            replies: Mutex::new(replies.into()),
            ..Script::default()
        })
    }

    pub(crate) fn transport(self: &Arc<Self>) -> Box<dyn Transport> {
        Box::new(ScriptedTransport { script: self.clone() })
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub(crate) fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// How many response bodies have been dropped by their readers.
    pub(crate) fn bodies_released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct ScriptedTransport {
    script: Arc<Script>,
}

impl Transport for ScriptedTransport {
    fn reset(&mut self) -> Result<()> {
        self.script.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send(&mut self, outgoing: Outgoing<'_>) -> Result<Exchange> {
        self.script.sent.lock().push(Sent {
            method: outgoing.method,
            uri: outgoing.uri.clone(),
            headers: outgoing.headers.clone(),
            body: outgoing.body.map(<[u8]>::to_vec),
        });
        let canned = self
            .script
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Canned::ok(""));
        if canned.refuse {
            return Err(RestError::transport(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let reason = reqwest::StatusCode::from_u16(canned.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Ok(Exchange {
            status: canned.status,
            reason,
            headers: canned.headers,
            body: Box::new(TrackedBody {
                inner: Cursor::new(canned.body),
                released: self.script.released.clone(),
            }),
        })
    }
}

struct TrackedBody {
    inner: Cursor<Vec<u8>>,
    released: Arc<AtomicUsize>,
}

impl Read for TrackedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine over a shared script, for facade tests.
pub(crate) struct ScriptedEngine {
    interceptors: Arc<Interceptors>,
    script: Arc<Script>,
}

impl ScriptedEngine {
    pub(crate) fn new(script: Arc<Script>) -> Self {
        ScriptedEngine {
            interceptors: Arc::default(),
            script,
        }
    }
}

impl Engine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn interceptors(&self) -> &Arc<Interceptors> {
        &self.interceptors
    }

    fn request(&self, seq: u64, method: Method, uri: Url, entity: Option<Entity>) -> Result<Request> {
        Ok(Request::new(
            seq,
            method,
            uri,
            entity,
            self.interceptors.clone(),
            self.script.transport(),
        ))
    }

    fn set_basic_auth(&self, username: &str, password: &str) -> Result<()> {
        self.interceptors
            .set_request(Some(basic_auth_interceptor(username, password)));
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.interceptors.clear();
        Ok(())
    }
}
