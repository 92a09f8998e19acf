//! Request payloads and response body decoding.
//!
//! # Design
//! A payload is one of three recognized shapes: a raw JSON value, a
//! `JsonModel`, or a byte stream. Anything else can still be handed over as
//! `Entity::Other`, but it fails with `UnsupportedEntity` when the request
//! serializes it, which happens before any connection is opened.
//!
//! Response bodies are decoded according to `Content-Encoding` (`gzip`,
//! `deflate`, or identity).

use std::any::type_name;
use std::fmt;
use std::io::{Cursor, Read};

use flate2::read::{GzDecoder, ZlibDecoder};
use serde_json::Value;

use crate::error::{RestError, Result};
use crate::model::JsonModel;

/// A request payload.
pub enum Entity {
    Json(Value),
    Model(Box<dyn JsonModel + Send>),
    Stream(Box<dyn Read + Send>),
    /// A value of a type no engine knows how to send.
    Other { type_name: &'static str },
}

impl Entity {
    pub fn json(value: Value) -> Self {
        Entity::Json(value)
    }

    pub fn model<M: JsonModel + Send + 'static>(model: M) -> Self {
        Entity::Model(Box::new(model))
    }

    pub fn stream<R: Read + Send + 'static>(reader: R) -> Self {
        Entity::Stream(Box::new(reader))
    }

    /// Wrap a dynamically typed payload.
    ///
    /// `serde_json::Value`, `Vec<u8>` and `String` (sent as raw bytes) are
    /// recognized; any other type becomes `Entity::Other`.
    pub fn from_any<T: std::any::Any + Send>(value: T) -> Self {
        let mut slot = Some(value);
        let any = &mut slot as &mut dyn std::any::Any;
        if let Some(v) = any.downcast_mut::<Option<Value>>() {
            return v.take().map(Entity::Json).unwrap_or(Entity::Json(Value::Null));
        }
        if let Some(v) = any.downcast_mut::<Option<Vec<u8>>>() {
            return Entity::stream(Cursor::new(v.take().unwrap_or_default()));
        }
        if let Some(v) = any.downcast_mut::<Option<String>>() {
            return Entity::stream(Cursor::new(v.take().unwrap_or_default().into_bytes()));
        }
        Entity::Other {
            type_name: type_name::<T>(),
        }
    }

    /// Serialize to the bytes sent on the wire.
    ///
    /// Streams are read to completion, so this is called once per request
    /// and the result reused for replays.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        match self {
            Entity::Json(value) => Ok(value.to_string().into_bytes()),
            Entity::Model(model) => Ok(model.to_json_value().to_string().into_bytes()),
            Entity::Stream(reader) => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data)?;
                Ok(data)
            }
            Entity::Other { type_name } => Err(RestError::UnsupportedEntity { type_name }),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Entity::Model(model) => f.debug_tuple("Model").field(&model.to_json_value()).finish(),
            Entity::Stream(_) => f.write_str("Stream(..)"),
            Entity::Other { type_name } => f.debug_struct("Other").field("type_name", type_name).finish(),
        }
    }
}

impl From<Value> for Entity {
    fn from(value: Value) -> Self {
        Entity::Json(value)
    }
}

impl From<Vec<u8>> for Entity {
    fn from(data: Vec<u8>) -> Self {
        Entity::stream(Cursor::new(data))
    }
}

impl From<&'static [u8]> for Entity {
    fn from(data: &'static [u8]) -> Self {
        Entity::stream(data)
    }
}

/// Read `body` to the end, undoing `content_encoding` if it is `gzip` or
/// `deflate` (zlib-wrapped).
pub fn decode_body(mut body: impl Read, content_encoding: Option<&str>) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    match content_encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
        Some("gzip") | Some("x-gzip") => {
            GzDecoder::new(body).read_to_end(&mut data)?;
        }
        Some("deflate") => {
            ZlibDecoder::new(body).read_to_end(&mut data)?;
        }
        _ => {
            body.read_to_end(&mut data)?;
        }
    }
    Ok(data)
}
