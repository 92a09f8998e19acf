//! Remote peer for exercising the REST facade over real HTTP.
//!
//! Routes:
//! - `/items`, `/items/{id}`: an in-memory JSON collection (GET, POST, PUT,
//!   PATCH, DELETE).
//! - `/echo`: any method; answers with the method, headers and body it got.
//! - `/encoded/gzip`, `/encoded/deflate`, `/encoded/broken`: compressed (or
//!   corrupt) JSON bodies.
//! - `/empty`, `/scalar`: an empty body and a bare JSON number.
//! - `/basic`, `/digest`: Basic and Digest protected resources.
//! - `/cookies/set`, `/cookies/check`: session cookie round trip.
//! - `/stats`: how many requests and digest challenges the server has seen.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

pub const USERNAME: &str = "mufasa";
pub const PASSWORD: &str = "circle of life";
pub const REALM: &str = "mock@localhost";
pub const NONCE: &str = "dcd98b7102dd2f0e8b11d0f600bfb0c093";
pub const OPAQUE: &str = "5ccc069c403ebaf9f0171e9517f40e41";
pub const SESSION_COOKIE: &str = "session=7f3a9c";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct CreateItem {
    pub name: String,
    #[serde(default)]
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct PatchItem {
    pub name: Option<String>,
    pub quantity: Option<u32>,
}

#[derive(Clone, Default)]
pub struct AppState {
    items: Arc<RwLock<HashMap<Uuid, Item>>>,
    requests: Arc<AtomicUsize>,
    challenges: Arc<AtomicUsize>,
}

pub fn app() -> Router {
    let state = AppState::default();
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route(
            "/items/{id}",
            get(get_item).put(replace_item).patch(patch_item).delete(delete_item),
        )
        .route("/echo", any(echo))
        .route("/encoded/{encoding}", get(encoded))
        .route("/empty", get(|| async { StatusCode::OK }))
        .route("/scalar", get(|| async { ([(header::CONTENT_TYPE, "application/json")], "42") }))
        .route("/basic", get(basic))
        .route("/digest", any(digest))
        .route("/cookies/set", get(set_cookie))
        .route("/cookies/check", get(check_cookie))
        .route("/stats", get(stats))
        .layer(axum::middleware::from_fn_with_state(state.clone(), count_requests))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn count_requests(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    if request.uri().path() != "/stats" {
        state.requests.fetch_add(1, Ordering::SeqCst);
    }
    debug!(method = %request.method(), uri = %request.uri(), "request");
    next.run(request).await
}

async fn list_items(State(state): State<AppState>) -> Json<Vec<Item>> {
    let items = state.items.read().await;
    Json(items.values().cloned().collect())
}

async fn create_item(State(state): State<AppState>, Json(input): Json<CreateItem>) -> (StatusCode, Json<Item>) {
    let item = Item {
        id: Uuid::new_v4(),
        name: input.name,
        quantity: input.quantity,
    };
    state.items.write().await.insert(item.id, item.clone());
    (StatusCode::CREATED, Json(item))
}

async fn get_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Item>, StatusCode> {
    let items = state.items.read().await;
    items.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn replace_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateItem>,
) -> Result<Json<Item>, StatusCode> {
    let mut items = state.items.write().await;
    let item = items.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    item.name = input.name;
    item.quantity = input.quantity;
    Ok(Json(item.clone()))
}

async fn patch_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<PatchItem>,
) -> Result<Json<Item>, StatusCode> {
    let mut items = state.items.write().await;
    let item = items.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(name) = input.name {
        item.name = name;
    }
    if let Some(quantity) = input.quantity {
        item.quantity = quantity;
    }
    Ok(Json(item.clone()))
}

async fn delete_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    match state.items.write().await.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let mut seen: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in &headers {
        seen.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "headers": seen,
        "body": String::from_utf8_lossy(&body),
        "length": body.len(),
    }))
}

/// The JSON document served by the `/encoded` routes.
pub const ENCODED_DOCUMENT: &str = r#"[{"encoded":true,"note":"compressed on the wire"}]"#;

/// Compress `data` with the named content-coding.
pub fn compress(encoding: &str, data: &[u8]) -> std::io::Result<Vec<u8>> {
    match encoding {
        "gzip" => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        "deflate" => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()
        }
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unknown content-coding {other}"),
        )),
    }
}

async fn encoded(Path(encoding): Path<String>) -> Response {
    let (content_encoding, body) = match encoding.as_str() {
        "gzip" | "deflate" => match compress(&encoding, ENCODED_DOCUMENT.as_bytes()) {
            Ok(body) => (encoding.as_str(), body),
            Err(error) => {
                warn!(%error, encoding = %encoding, "failed to compress document");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
        "broken" => ("gzip", b"this is not gzip at all".to_vec()),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CONTENT_ENCODING, content_encoding),
        ],
        body,
    )
        .into_response()
}

async fn basic(headers: HeaderMap) -> Response {
    let expected = format!("Basic {}", STANDARD.encode(format!("{USERNAME}:{PASSWORD}")));
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if authorized {
        Json(json!({ "user": USERNAME })).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, format!(r#"Basic realm="{REALM}""#))],
        )
            .into_response()
    }
}

fn md5_hex(text: &str) -> String {
    format!("{:x}", Md5::digest(text.as_bytes()))
}

/// Check an RFC 2069 digest answer (no qop) against the fixed credentials.
pub fn verify_digest(method: &str, authorization: &str) -> bool {
    let Some(params) = authorization.strip_prefix("Digest ") else {
        return false;
    };
    let params: HashMap<&str, &str> = params
        .split(", ")
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
        .collect();
    let (Some(&user), Some(&uri), Some(&nonce), Some(&response)) = (
        params.get("username"),
        params.get("uri"),
        params.get("nonce"),
        params.get("response"),
    ) else {
        return false;
    };
    let ha1 = md5_hex(&format!("{user}:{REALM}:{PASSWORD}"));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    user == USERNAME && nonce == NONCE && response == md5_hex(&format!("{ha1}:{nonce}:{ha2}"))
}

async fn digest(State(state): State<AppState>, method: Method, headers: HeaderMap) -> Response {
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if authorization.is_some_and(|a| verify_digest(method.as_str(), a)) {
        return Json(json!({ "authenticated": true, "method": method.as_str() })).into_response();
    }
    state.challenges.fetch_add(1, Ordering::SeqCst);
    let challenge = format!(r#"Digest realm="{REALM}", nonce="{NONCE}", opaque="{OPAQUE}", algorithm=MD5"#);
    (StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, challenge)]).into_response()
}

async fn set_cookie() -> impl IntoResponse {
    ([(header::SET_COOKIE, format!("{SESSION_COOKIE}; Path=/"))], Json(json!({ "set": true })))
}

async fn check_cookie(headers: HeaderMap) -> Json<Value> {
    let cookie = headers.get(header::COOKIE).and_then(|v| v.to_str().ok());
    Json(json!({ "cookie": cookie }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "requests": state.requests.load(Ordering::SeqCst),
        "challenges": state.challenges.load(Ordering::SeqCst),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(method: &str, uri: &str, password: &str) -> String {
        let ha1 = md5_hex(&format!("{USERNAME}:{REALM}:{password}"));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let response = md5_hex(&format!("{ha1}:{NONCE}:{ha2}"));
        format!(
            r#"Digest username="{USERNAME}", realm="{REALM}", nonce="{NONCE}", uri="{uri}", response="{response}", algorithm=MD5, opaque="{OPAQUE}""#
        )
    }

    #[test]
    fn md5_hex_matches_known_vector() {
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn correct_digest_answer_verifies() {
        assert!(verify_digest("GET", &answer("GET", "/digest", PASSWORD)));
    }

    #[test]
    fn wrong_password_fails() {
        assert!(!verify_digest("GET", &answer("GET", "/digest", "hakuna matata")));
    }

    #[test]
    fn answer_is_bound_to_method() {
        assert!(!verify_digest("POST", &answer("GET", "/digest", PASSWORD)));
    }

    #[test]
    fn basic_scheme_is_not_digest() {
        assert!(!verify_digest("GET", "Basic bXVmYXNhOmNpcmNsZSBvZiBsaWZl"));
    }

    #[test]
    fn compress_round_trips_both_codings() {
        use std::io::Read;

        let gzip = compress("gzip", ENCODED_DOCUMENT.as_bytes()).unwrap();
        let mut text = String::new();
        flate2::read::GzDecoder::new(&gzip[..]).read_to_string(&mut text).unwrap();
        assert_eq!(text, ENCODED_DOCUMENT);

        let zlib = compress("deflate", ENCODED_DOCUMENT.as_bytes()).unwrap();
        let mut text = String::new();
        flate2::read::ZlibDecoder::new(&zlib[..]).read_to_string(&mut text).unwrap();
        assert_eq!(text, ENCODED_DOCUMENT);
    }

    #[test]
    fn compress_rejects_unknown_coding() {
        let err = compress("br", b"x").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn item_serializes_to_json() {
        let item = Item {
            id: Uuid::nil(),
            name: "bolt".to_string(),
            quantity: 12,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["name"], "bolt");
        assert_eq!(json["quantity"], 12);
    }

    #[test]
    fn create_item_defaults_quantity_to_zero() {
        let input: CreateItem = serde_json::from_str(r#"{"name":"nut"}"#).unwrap();
        assert_eq!(input.quantity, 0);
    }
}
