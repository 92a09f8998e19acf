//! HTTP Digest authentication (challenge parsing and response computation).
//!
//! # Design
//! The handshake is driven entirely from a response interceptor: a `401`
//! carrying a `WWW-Authenticate: Digest ...` challenge yields a `Replay`
//! with the computed `Authorization` header, and the request loop sends the
//! original request once more. Requests that already carried an
//! `Authorization` header are never replayed, which bounds the exchange to a
//! single retry even when the server keeps answering `401`.
//!
//! Only the classic RFC 2069 form is produced (no `qop`, no `cnonce`):
//!
//! ```text
//! HA1      = H(username ":" realm ":" password)
//! HA2      = H(method ":" path)
//! response = H(HA1 ":" nonce ":" HA2)
//! ```

use std::sync::Arc;

use sha2::Digest as _;
use tracing::{debug, warn};

use crate::engine::{Replay, ResponseInterceptor};
use crate::http::{Headers, Method};
use crate::response::Response;

const DEFAULT_OPAQUE: &str = "00000000000000000000000000000000";
const DEFAULT_ALGORITHM: &str = "MD5";

/// Lower-case hexadecimal rendering of `bytes`.
pub fn hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push(HEX[(b >> 4) as usize] as char);
        s.push(HEX[(b & 0x0f) as usize] as char);
    }
    s
}

/// Hash functions a server may name in the `algorithm` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Resolve a challenge's algorithm name. Accepts the spellings a JVM
    /// message-digest registry accepts (`SHA`, `SHA1`, `SHA-1`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "MD5" => Some(DigestAlgorithm::Md5),
            "SHA" | "SHA1" | "SHA-1" => Some(DigestAlgorithm::Sha1),
            "SHA256" | "SHA-256" => Some(DigestAlgorithm::Sha256),
            "SHA512" | "SHA-512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Md5 => md5::Md5::digest(data).to_vec(),
            DigestAlgorithm::Sha1 => sha1::Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }

    /// Hash the `:`-joined values and hex-encode the result.
    ///
    /// The joined text is encoded as ISO-8859-1; characters outside that
    /// range become `?`.
    pub fn concat(&self, values: &[&str]) -> String {
        let joined = values.join(":");
        let latin1: Vec<u8> = joined
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        hex(&self.hash(&latin1))
    }
}

/// Parameters of a `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Find the first Digest challenge among the `WWW-Authenticate` values.
    ///
    /// Returns `None` when no Digest challenge is present or when it lacks a
    /// `realm` or `nonce`.
    pub fn from_headers(headers: &Headers) -> Option<Self> {
        let value = headers
            .get_all("WWW-Authenticate")
            .find(|v| v.get(..7).is_some_and(|s| s.eq_ignore_ascii_case("digest ")))?;
        Self::parse(&value[7..])
    }

    /// Parse the comma-separated `name=value` list following `Digest `.
    pub fn parse(params: &str) -> Option<Self> {
        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        for (name, value) in parse_params(params) {
            match name.as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                _ => {}
            }
        }
        Some(DigestChallenge {
            realm: realm?,
            nonce: nonce?,
            opaque,
            algorithm,
        })
    }

    /// Build the `Authorization` header value answering this challenge.
    ///
    /// Returns `None` if the challenge names a hash function we do not
    /// implement.
    pub fn authorize(&self, username: &str, password: &str, method: Method, path: &str) -> Option<String> {
        let name = self.algorithm.as_deref().unwrap_or(DEFAULT_ALGORITHM);
        let algorithm = DigestAlgorithm::from_name(name)?;
        let opaque = self.opaque.as_deref().unwrap_or(DEFAULT_OPAQUE);

        let ha1 = algorithm.concat(&[username, &self.realm, password]);
        let ha2 = algorithm.concat(&[method.as_str(), path]);
        let response = algorithm.concat(&[&ha1, &self.nonce, &ha2]);

        Some(format!(
            r#"Digest username="{username}", realm="{realm}", nonce="{nonce}", uri="{path}", response="{response}", algorithm={name}, opaque="{opaque}""#,
            realm = self.realm,
            nonce = self.nonce,
        ))
    }
}

/// Split `a=1, b="x, y", c=z` into lower-cased names and unquoted values.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let name = rest[..eq].trim_matches(|c: char| c == ',' || c.is_whitespace()).to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            let value = quoted[..end].to_string();
            rest = quoted.get(end + 1..).unwrap_or("");
            value
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let value = rest[..end].trim().to_string();
            rest = &rest[end..];
            value
        };

        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if !name.is_empty() {
            params.push((name, value));
        }
    }
    params
}

/// Response interceptor answering Digest challenges with `username`/`password`.
pub fn interceptor(username: &str, password: &str) -> ResponseInterceptor {
    let username = username.to_string();
    let password = password.to_string();
    Arc::new(move |response: &Response| {
        if response.status() != 401 {
            return None;
        }
        let request = response.request();
        if request.headers.contains("Authorization") {
            return None;
        }
        let Some(challenge) = DigestChallenge::from_headers(response.headers()) else {
            debug!(seq = request.seq, "401 without a usable digest challenge");
            return None;
        };
        let Some(header) = challenge.authorize(&username, &password, request.method, request.uri.path()) else {
            warn!(
                seq = request.seq,
                algorithm = ?challenge.algorithm,
                "digest challenge names an unsupported algorithm"
            );
            return None;
        };

        debug!(seq = request.seq, realm = %challenge.realm, "answering digest challenge");
        let mut headers = Headers::new();
        headers.set("Authorization", header);
        Some(Replay { headers })
    })
}
