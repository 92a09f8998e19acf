//! Error types for the REST facade.
//!
//! # Design
//! Fatal caller mistakes (`InvalidUri`, `UnsupportedEntity`) are raised before
//! any I/O happens. Everything the network or the HTTP library can throw is
//! folded into `Transport` so callers do not depend on which engine performed
//! the exchange. Body decoding failures surface as `Io`.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by the facade, requests and responses.
#[derive(Debug, Error)]
pub enum RestError {
    /// The base URI and path did not combine into a valid absolute URI.
    #[error("invalid URI {uri:?}: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    /// The request payload is not JSON, a JSON model or a byte stream.
    #[error("don't know how to send an entity of type {type_name}")]
    UnsupportedEntity { type_name: &'static str },

    /// The body parsed as JSON, but not as an array or object.
    #[error("unexpected JSON value in response body: expected array or object, found {found}")]
    UnexpectedJsonShape { found: &'static str },

    /// The body (or a payload) was not valid JSON text.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Basic auth on the full-client engine needs the target host up front.
    #[error("a base URI must be configured before enabling basic authentication")]
    MissingBaseUri,

    /// Connection, DNS, TLS or protocol failure inside the HTTP library.
    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: BoxError,
    },

    /// Reading a payload stream or decoding a response body failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl RestError {
    pub(crate) fn transport<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        RestError::Transport {
            source: error.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RestError>;
