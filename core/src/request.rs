//! Engine-independent request: an immutable `(seq, method, uri, entity)`
//! plus mutable headers.
//!
//! # Design
//! `execute()` runs one attempt after another in an explicit loop:
//! request interceptor, send, response interceptor. A response interceptor
//! may ask for a replay once; the loop then resets the request (fresh
//! transport state, default headers restored), attaches the replay headers
//! and sends again. The `replayed` flag is the only retry guard, so the loop
//! runs at most twice.
//!
//! Headers set by the caller survive `reset()`. Headers set by a request
//! interceptor do not (the interceptor re-applies them on every attempt),
//! and neither do the headers attached for a replay.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::engine::{Interceptors, Outgoing, Transport};
use crate::entity::Entity;
use crate::error::Result;
use crate::http::{Headers, Method, RequestInfo};
use crate::registry::{InFlightRegistry, InFlightTicket};
use crate::response::Response;

const USER_AGENT: &str = concat!("rest-core/", env!("CARGO_PKG_VERSION"), " (Rust)");

fn default_headers() -> Headers {
    let mut headers = Headers::new();
    headers.set("Accept-Encoding", "gzip, deflate");
    headers.set("Content-Type", "application/json");
    headers.set("Accept", "application/json");
    headers.set("User-Agent", USER_AGENT);
    headers.set("Connection", "Keep-Alive");
    headers
}

pub struct Request {
    seq: u64,
    method: Method,
    uri: Url,
    entity: Option<Entity>,
    payload: Option<Vec<u8>>,
    headers: Headers,
    pinned: Headers,
    intercepting: bool,
    replayed: bool,
    interceptors: Arc<Interceptors>,
    transport: Box<dyn Transport>,
    ticket: Option<InFlightTicket>,
}

impl Request {
    pub fn new(
        seq: u64,
        method: Method,
        uri: Url,
        entity: Option<Entity>,
        interceptors: Arc<Interceptors>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            seq,
            method,
            uri,
            entity,
            payload: None,
            headers: default_headers(),
            pinned: Headers::new(),
            intercepting: false,
            replayed: false,
            interceptors,
            transport,
            ticket: None,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn entity(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Set `name` to `value`, replacing any earlier value (including the
    /// defaults).
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if !self.intercepting {
            self.pinned.set(name, value.clone());
        }
        self.headers.set(name, value);
    }

    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            seq: self.seq,
            method: self.method,
            uri: self.uri.clone(),
            headers: self.headers.clone(),
        }
    }

    /// Start over: fresh transport state, default headers plus the ones the
    /// caller set.
    pub fn reset(&mut self) -> Result<()> {
        self.transport.reset()?;
        let mut headers = default_headers();
        headers.extend_from(&self.pinned);
        self.headers = headers;
        Ok(())
    }

    /// Perform the exchange and return the (possibly replayed) response.
    ///
    /// If the request is registered as in flight, the registry entry moves
    /// to the returned response, or is removed right away when execution
    /// fails.
    pub fn execute(&mut self) -> Result<Response> {
        let ticket = self.ticket.take();
        match self.run() {
            Ok(mut response) => {
                response.attach(ticket);
                Ok(response)
            }
            Err(error) => {
                if let Some(ticket) = ticket {
                    ticket.release();
                }
                Err(error)
            }
        }
    }

    pub(crate) fn track(&mut self, registry: &InFlightRegistry) {
        registry.add(self.info());
        self.ticket = Some(registry.ticket(self.seq));
    }

    fn run(&mut self) -> Result<Response> {
        if self.payload.is_none() {
            if let Some(entity) = self.entity.as_mut() {
                self.payload = Some(entity.to_bytes()?);
            }
        }

        loop {
            self.intercept();
            if let Some(payload) = &self.payload {
                self.headers.set("Content-Length", payload.len().to_string());
            }

            debug!(seq = self.seq, method = %self.method, uri = %self.uri, "sending request");
            let exchange = self.transport.send(Outgoing {
                method: self.method,
                uri: &self.uri,
                headers: &self.headers,
                body: self.payload.as_deref(),
            })?;
            let response = Response::new(self.info(), exchange);

            let replay = self
                .interceptors
                .response()
                .and_then(|interceptor| interceptor(&response));
            match replay {
                Some(replay) if !self.replayed => {
                    debug!(seq = self.seq, status = response.status(), "replaying request");
                    drop(response);
                    self.replayed = true;
                    self.reset()?;
                    // Not pinned: a later reset() drops them.
                    self.intercepting = true;
                    for (name, value) in replay.headers.iter() {
                        self.add_header(name, value);
                    }
                    self.intercepting = false;
                }
                _ => return Ok(response),
            }
        }
    }

    fn intercept(&mut self) {
        if let Some(interceptor) = self.interceptors.request() {
            self.intercepting = true;
            interceptor(self);
            self.intercepting = false;
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("seq", &self.seq)
            .field("method", &self.method)
            .field("uri", &self.uri.as_str())
            .field("headers", &self.headers)
            .field("entity", &self.entity)
            .finish_non_exhaustive()
    }
}
