//! Provider-agnostic REST facade over pluggable HTTP engines.
//!
//! # Overview
//! Application code talks to `Rest`: verb helpers resolve a path against a
//! base URI, serialize a JSON / model / byte-stream payload and return a
//! `Response` whose body can be read as bytes, text, or a JSON array/object.
//! Which HTTP library does the socket work is an engine choice made at
//! construction time.
//!
//! # Design
//! - `Request` and `Response` hold all protocol semantics (default headers,
//!   interceptors, the one-shot Digest replay, gzip/deflate decoding, single
//!   body consumption). Engines only supply a `Transport` per request.
//! - Two engines: `MinimalEngine` (ureq, one connection per request) and
//!   `ClientEngine` (reqwest, shared pooled client with cookies and a Basic
//!   auth cache).
//! - An `InFlightRegistry` lists requests whose responses are not consumed
//!   yet, for progress indicators. Consumption always removes the entry,
//!   including on error paths and on drop.
//! - No global mutable state beyond the default-engine switch and the shared
//!   sequence counter; both can be bypassed per facade.

pub mod client;
pub mod config;
pub mod digest;
pub mod engine;
pub mod entity;
pub mod error;
pub mod http;
pub mod model;
pub mod registry;
pub mod request;
pub mod response;

#[cfg(test)]
mod testing;

pub use client::{resolve_uri, Rest, SequenceCounter};
pub use config::{AuthConfig, AuthScheme, ProxyConfig, RestConfig, Settings, SharedSettings};
pub use engine::{
    default_engine, set_default_engine, use_full_client, ClientEngine, Engine, EngineKind, Exchange,
    Interceptors, MinimalEngine, Outgoing, Replay, Transport,
};
pub use entity::Entity;
pub use error::{RestError, Result};
pub use http::{Headers, Method, RequestInfo};
pub use model::{model_from_object, models_from_array, JsonModel};
pub use registry::{InFlightRegistry, Progress, RegistryEvent};
pub use request::Request;
pub use response::Response;
