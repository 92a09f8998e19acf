//! Response with single-consumption body semantics.
//!
//! # Design
//! The body is read from the transport at most once. The first accessor that
//! needs it (`bytes`, `text`, `list`, `one`, `consume`) drains and decodes
//! the stream, caches the result and releases the in-flight registry entry,
//! whether decoding succeeded or not. Later calls see the cache. Dropping an
//! unconsumed response runs the same cleanup, so every exit path (including
//! `?` on an error) leaves the registry consistent.

use std::fmt;
use std::io::Read;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::engine::Exchange;
use crate::entity::decode_body;
use crate::error::{RestError, Result};
use crate::http::{Headers, RequestInfo};
use crate::model::json_kind;
use crate::registry::InFlightTicket;

pub struct Response {
    request: RequestInfo,
    status: u16,
    reason: String,
    headers: Headers,
    body: Option<Box<dyn Read + Send>>,
    cached: Option<Vec<u8>>,
    ticket: Option<InFlightTicket>,
}

impl Response {
    pub(crate) fn new(request: RequestInfo, exchange: Exchange) -> Self {
        Self {
            request,
            status: exchange.status,
            reason: exchange.reason,
            headers: exchange.headers,
            body: Some(exchange.body),
            cached: None,
            ticket: None,
        }
    }

    pub(crate) fn attach(&mut self, ticket: Option<InFlightTicket>) {
        self.ticket = ticket;
    }

    /// The request this response answers, as it was last sent.
    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// `true` for status 200 exactly.
    pub fn ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_consumed(&self) -> bool {
        self.cached.is_some()
    }

    /// The decoded body. Reads the transport on the first call only.
    ///
    /// If decoding fails the cached body is left empty and the error is
    /// returned; the response counts as consumed either way.
    pub fn bytes(&mut self) -> Result<&[u8]> {
        if let Some(body) = self.body.take() {
            let encoding = self.headers.get("Content-Encoding").map(str::to_owned);
            let decoded = decode_body(body, encoding.as_deref());
            self.release();
            match decoded {
                Ok(data) => self.cached = Some(data),
                Err(error) => {
                    self.cached = Some(Vec::new());
                    return Err(RestError::Io(error));
                }
            }
        }
        Ok(self.cached.get_or_insert_with(Vec::new).as_slice())
    }

    /// The body as UTF-8 text (invalid sequences replaced).
    pub fn text(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.bytes()?).into_owned())
    }

    /// The body as a JSON array: arrays as-is, an object as a one-element
    /// array, an empty body as an empty array.
    pub fn list(&mut self) -> Result<Vec<Value>> {
        let result = self.json().and_then(|json| match json {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(object @ Value::Object(_)) => Ok(vec![object]),
            Some(other) => Err(RestError::UnexpectedJsonShape {
                found: json_kind(&other),
            }),
        });
        self.consume();
        result
    }

    /// The body as a single JSON object: an object as-is, the first element
    /// of an array, and an empty object for an empty body or empty array.
    pub fn one(&mut self) -> Result<Map<String, Value>> {
        let result = self.json().and_then(|json| match json {
            None => Ok(Map::new()),
            Some(Value::Object(object)) => Ok(object),
            Some(Value::Array(items)) => match items.into_iter().next() {
                None => Ok(Map::new()),
                Some(Value::Object(object)) => Ok(object),
                Some(other) => Err(RestError::UnexpectedJsonShape {
                    found: json_kind(&other),
                }),
            },
            Some(other) => Err(RestError::UnexpectedJsonShape {
                found: json_kind(&other),
            }),
        });
        self.consume();
        result
    }

    /// Drain the body (if nobody has) and release the registry entry.
    /// Safe to call any number of times; drain failures are logged, not
    /// returned.
    pub fn consume(&mut self) -> &mut Self {
        if self.body.is_some() {
            if let Err(error) = self.bytes() {
                warn!(seq = self.request.seq, %error, "failed to drain response body");
            }
        }
        self.release();
        self
    }

    /// Consume and drop.
    pub fn close(mut self) {
        self.consume();
    }

    fn json(&mut self) -> Result<Option<Value>> {
        let bytes = self.bytes()?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(bytes)?))
    }

    fn release(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            if ticket.release() {
                debug!(seq = self.request.seq, status = self.status, "response consumed");
            }
        }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        self.consume();
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("request", &self.request)
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}
