//! Pluggable transport engines.
//!
//! # Design
//! An `Engine` turns `(seq, method, uri, entity)` into a `Request` and owns
//! the authentication hooks applied to every request it builds. The actual
//! bytes-on-the-wire work sits behind `Transport`, one instance per request,
//! so the request/response semantics (default headers, interceptors, digest
//! replay, body consumption) are written once in `Request` and `Response`.
//!
//! Two engines ship with the crate:
//! - `MinimalEngine` (ureq): a fresh agent, and so a fresh connection, per
//!   request; Basic auth is a request interceptor.
//! - `ClientEngine` (reqwest): one client shared by every request of the
//!   engine (connection pool, cookie store), preemptive Basic auth cached
//!   for the configured host; rebuilt on `reset()`.
//!
//! The process-wide default is `Minimal`; call `use_full_client()` before
//! constructing facades to switch. Each facade captures the default at
//! construction time.

pub mod client;
pub mod minimal;

use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SharedSettings;
use crate::entity::Entity;
use crate::error::Result;
use crate::http::{Headers, Method};
use crate::request::Request;
use crate::response::Response;

pub use client::ClientEngine;
pub use minimal::MinimalEngine;

/// Which built-in engine a facade uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// One connection per request on a minimal blocking client.
    #[default]
    Minimal,
    /// A shared, pooled, cookie-aware client.
    Client,
}

static DEFAULT_ENGINE: AtomicU8 = AtomicU8::new(0);

/// Choose the engine facades pick up when their configuration names none.
pub fn set_default_engine(kind: EngineKind) {
    let raw = match kind {
        EngineKind::Minimal => 0,
        EngineKind::Client => 1,
    };
    DEFAULT_ENGINE.store(raw, Ordering::SeqCst);
}

pub fn default_engine() -> EngineKind {
    match DEFAULT_ENGINE.load(Ordering::SeqCst) {
        1 => EngineKind::Client,
        _ => EngineKind::Minimal,
    }
}

/// Make the full-featured client the process-wide default.
pub fn use_full_client() {
    set_default_engine(EngineKind::Client);
}

pub(crate) fn build(kind: EngineKind, settings: SharedSettings) -> Result<Arc<dyn Engine>> {
    Ok(match kind {
        EngineKind::Minimal => Arc::new(MinimalEngine::new(settings)),
        EngineKind::Client => Arc::new(ClientEngine::new(settings)?),
    })
}

/// A request as handed to a transport for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct Outgoing<'a> {
    pub method: Method,
    pub uri: &'a Url,
    pub headers: &'a Headers,
    pub body: Option<&'a [u8]>,
}

/// What a transport got back: status line, headers, and the unread body.
pub struct Exchange {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Per-request connection state of an engine.
pub trait Transport: Send {
    /// Throw away connection state so the next `send` starts fresh.
    fn reset(&mut self) -> Result<()>;

    /// Perform one HTTP exchange. Transports write their own framing
    /// headers, so a `Content-Length` entry in `outgoing.headers` is
    /// informational.
    fn send(&mut self, outgoing: Outgoing<'_>) -> Result<Exchange>;
}

/// Headers a response interceptor wants attached before the request is sent
/// once more.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replay {
    pub headers: Headers,
}

/// Runs before every attempt; typically adds an `Authorization` header.
pub type RequestInterceptor = Arc<dyn Fn(&mut Request) + Send + Sync>;

/// Inspects every response; returning a `Replay` discards the response and
/// re-sends the request (at most once per request).
pub type ResponseInterceptor = Arc<dyn Fn(&Response) -> Option<Replay> + Send + Sync>;

/// The two hooks an engine applies to the requests it builds. Requests keep a
/// handle to these, so hooks installed later still apply to the next attempt.
#[derive(Default)]
pub struct Interceptors {
    request: RwLock<Option<RequestInterceptor>>,
    response: RwLock<Option<ResponseInterceptor>>,
}

impl Interceptors {
    pub fn request(&self) -> Option<RequestInterceptor> {
        self.request.read().clone()
    }

    pub fn response(&self) -> Option<ResponseInterceptor> {
        self.response.read().clone()
    }

    pub fn set_request(&self, interceptor: Option<RequestInterceptor>) {
        *self.request.write() = interceptor;
    }

    pub fn set_response(&self, interceptor: Option<ResponseInterceptor>) {
        *self.response.write() = interceptor;
    }

    pub fn clear(&self) {
        self.set_request(None);
        self.set_response(None);
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("request", &self.request.read().is_some())
            .field("response", &self.response.read().is_some())
            .finish()
    }
}

/// Request interceptor setting `Authorization: Basic base64(username:password)`.
pub fn basic_auth_interceptor(username: &str, password: &str) -> RequestInterceptor {
    let value = format!("Basic {}", STANDARD.encode(format!("{username}:{password}")));
    Arc::new(move |request: &mut Request| request.add_header("Authorization", value.clone()))
}

/// Builds requests and owns the authentication state applied to them.
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    fn interceptors(&self) -> &Arc<Interceptors>;

    fn request(&self, seq: u64, method: Method, uri: Url, entity: Option<Entity>) -> Result<Request>;

    fn set_basic_auth(&self, username: &str, password: &str) -> Result<()>;

    /// Answer `401` Digest challenges with these credentials.
    fn set_digest_auth(&self, username: &str, password: &str) {
        self.interceptors()
            .set_response(Some(crate::digest::interceptor(username, password)));
    }

    /// Drop credentials and connection state.
    fn reset(&self) -> Result<()>;
}

impl fmt::Debug for dyn Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name())
            .field("interceptors", self.interceptors())
            .finish()
    }
}
