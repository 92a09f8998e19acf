//! The `Rest` facade: base URI resolution, verb helpers, dispatch.
//!
//! # Design
//! `Rest` holds the settings it shares with its engine, the engine chosen at
//! construction, an in-flight registry and a sequence counter. Every verb
//! goes through `execute_with`, which resolves the URI, numbers the request,
//! lets the caller customize it, registers it as in flight and executes it
//! synchronously on the calling thread.
//!
//! Registry and counter are injectable so several facades can feed one
//! progress indicator; by default each facade gets its own registry and all
//! facades share the process-wide counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;
use url::Url;

use crate::config::{AuthScheme, ProxyConfig, RestConfig, SharedSettings};
use crate::engine::{self, Engine};
use crate::entity::Entity;
use crate::error::{RestError, Result};
use crate::http::Method;
use crate::registry::InFlightRegistry;
use crate::request::Request;
use crate::response::Response;

/// Monotonic source of request sequence numbers. Clones share the count.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter shared by every facade that was not given its own.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<SequenceCounter> = OnceLock::new();
        GLOBAL.get_or_init(SequenceCounter::new).clone()
    }

    /// Next number; the first is 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Resolve `path` against `base`.
///
/// An absolute `path` is used as is. Otherwise `base` and `path` are joined
/// with exactly one `/` between them. Literal spaces become `%20`.
pub fn resolve_uri(base: Option<&str>, path: &str) -> Result<Url> {
    let escaped = path.replace(' ', "%20");
    match Url::parse(&escaped) {
        Ok(uri) => return Ok(uri),
        Err(url::ParseError::RelativeUrlWithoutBase) => {}
        Err(source) => return Err(RestError::InvalidUri { uri: escaped, source }),
    }

    let base = base.unwrap_or_default();
    let joined = match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
    .replace(' ', "%20");
    Url::parse(&joined).map_err(|source| RestError::InvalidUri { uri: joined, source })
}

/// Facade over a transport engine.
#[derive(Debug)]
pub struct Rest {
    settings: SharedSettings,
    engine: Arc<dyn Engine>,
    registry: InFlightRegistry,
    sequence: SequenceCounter,
}

impl Rest {
    /// A facade on the process-wide default engine, with no base URI.
    pub fn new() -> Result<Self> {
        Self::from_config(RestConfig::default())
    }

    /// Build from configuration. The engine is `config.engine` if set,
    /// otherwise the process-wide default at this moment.
    pub fn from_config(config: RestConfig) -> Result<Self> {
        let kind = config.engine.unwrap_or_else(engine::default_engine);
        Self::with_engine(config, |settings| engine::build(kind, settings))
    }

    /// Build with a caller-supplied engine. `make` receives the settings the
    /// engine should read base URI, proxy and timeout from.
    pub fn with_engine<F>(config: RestConfig, make: F) -> Result<Self>
    where
        F: FnOnce(SharedSettings) -> Result<Arc<dyn Engine>>,
    {
        let settings = Arc::new(RwLock::new(config.settings()));
        let engine = make(settings.clone())?;
        let rest = Rest {
            settings,
            engine,
            registry: InFlightRegistry::new(),
            sequence: SequenceCounter::global(),
        };
        if let Some(auth) = &config.auth {
            match auth.scheme {
                AuthScheme::Basic => rest.set_basic_auth(&auth.username, &auth.password)?,
                AuthScheme::Digest => rest.set_digest_auth(&auth.username, &auth.password),
            }
        }
        Ok(rest)
    }

    pub fn with_registry(mut self, registry: InFlightRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_sequence(mut self, sequence: SequenceCounter) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    pub fn base_uri(&self) -> Option<String> {
        self.settings.read().base_uri.clone()
    }

    pub fn set_base_uri(&self, base_uri: impl Into<String>) {
        self.settings.write().base_uri = Some(base_uri.into());
    }

    pub fn proxy(&self) -> Option<ProxyConfig> {
        self.settings.read().proxy.clone()
    }

    pub fn set_proxy(&self, proxy: Option<ProxyConfig>) {
        self.settings.write().proxy = proxy;
    }

    pub fn set_basic_auth(&self, username: &str, password: &str) -> Result<()> {
        self.engine.set_basic_auth(username, password)
    }

    pub fn set_digest_auth(&self, username: &str, password: &str) {
        self.engine.set_digest_auth(username, password)
    }

    /// Drop the engine's credentials and connection state.
    pub fn reset(&self) -> Result<()> {
        self.engine.reset()
    }

    pub fn resolve(&self, path: &str) -> Result<Url> {
        resolve_uri(self.settings.read().base_uri.as_deref(), path)
    }

    /// Every verb takes an optional payload: `None`, an `Entity`, or
    /// `Some(entity)`. The `_with` forms also take a customizer that may
    /// edit the request before it is sent.
    pub fn get(&self, path: &str, entity: impl Into<Option<Entity>>) -> Result<Response> {
        self.execute(Method::Get, path, entity.into())
    }

    pub fn get_with<F>(&self, path: &str, entity: impl Into<Option<Entity>>, customize: F) -> Result<Response>
    where
        F: FnOnce(&mut Request),
    {
        self.execute_with(Method::Get, path, entity.into(), customize)
    }

    pub fn put(&self, path: &str, entity: impl Into<Option<Entity>>) -> Result<Response> {
        self.execute(Method::Put, path, entity.into())
    }

    pub fn put_with<F>(&self, path: &str, entity: impl Into<Option<Entity>>, customize: F) -> Result<Response>
    where
        F: FnOnce(&mut Request),
    {
        self.execute_with(Method::Put, path, entity.into(), customize)
    }

    pub fn post(&self, path: &str, entity: impl Into<Option<Entity>>) -> Result<Response> {
        self.execute(Method::Post, path, entity.into())
    }

    pub fn post_with<F>(&self, path: &str, entity: impl Into<Option<Entity>>, customize: F) -> Result<Response>
    where
        F: FnOnce(&mut Request),
    {
        self.execute_with(Method::Post, path, entity.into(), customize)
    }

    pub fn patch(&self, path: &str, entity: impl Into<Option<Entity>>) -> Result<Response> {
        self.execute(Method::Patch, path, entity.into())
    }

    pub fn patch_with<F>(&self, path: &str, entity: impl Into<Option<Entity>>, customize: F) -> Result<Response>
    where
        F: FnOnce(&mut Request),
    {
        self.execute_with(Method::Patch, path, entity.into(), customize)
    }

    pub fn delete(&self, path: &str, entity: impl Into<Option<Entity>>) -> Result<Response> {
        self.execute(Method::Delete, path, entity.into())
    }

    pub fn delete_with<F>(&self, path: &str, entity: impl Into<Option<Entity>>, customize: F) -> Result<Response>
    where
        F: FnOnce(&mut Request),
    {
        self.execute_with(Method::Delete, path, entity.into(), customize)
    }

    pub fn execute(&self, method: Method, path: &str, entity: Option<Entity>) -> Result<Response> {
        self.execute_with(method, path, entity, |_| {})
    }

    /// Build, customize, register and execute one request.
    pub fn execute_with<F>(&self, method: Method, path: &str, entity: Option<Entity>, customize: F) -> Result<Response>
    where
        F: FnOnce(&mut Request),
    {
        let uri = self.resolve(path)?;
        let seq = self.sequence.next();
        let mut request = self.engine.request(seq, method, uri, entity)?;
        customize(&mut request);

        debug!(seq, %method, uri = %request.uri(), engine = self.engine.name(), "dispatching request");
        request.track(&self.registry);
        request.execute()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{Canned, Script, ScriptedEngine};

    fn rest(base: &str, script: &Arc<Script>) -> Rest {
        let script = script.clone();
        Rest::with_engine(RestConfig::default().with_base_uri(base), move |_| {
            Ok(Arc::new(ScriptedEngine::new(script)) as Arc<dyn Engine>)
        })
        .unwrap()
        .with_sequence(SequenceCounter::new())
    }

    #[test]
    fn join_inserts_exactly_one_slash() {
        let cases = [
            ("http://h/api/", "/items", "http://h/api/items"),
            ("http://h/api/", "items", "http://h/api/items"),
            ("http://h/api", "/items", "http://h/api/items"),
            ("http://h/api", "items", "http://h/api/items"),
            ("http://h", "items/1?q=a", "http://h/items/1?q=a"),
        ];
        for (base, path, expected) in cases {
            assert_eq!(resolve_uri(Some(base), path).unwrap().as_str(), expected, "{base} + {path}");
        }
    }

    #[test]
    fn join_never_doubles_the_separator() {
        let bases = ["http://h", "http://h/", "http://h/a", "http://h/a/"];
        let paths = ["x", "/x", "x/y", "/x/y/"];
        for base in bases {
            for path in paths {
                let uri = resolve_uri(Some(base), path).unwrap();
                assert!(!uri.path().contains("//"), "{base} + {path} gave {uri}");
                assert!(uri.path().ends_with(path.trim_start_matches('/')), "{base} + {path} gave {uri}");
            }
        }
    }

    #[test]
    fn absolute_path_ignores_base() {
        let uri = resolve_uri(Some("http://h/api"), "https://other.example/x y").unwrap();
        assert_eq!(uri.as_str(), "https://other.example/x%20y");
    }

    #[test]
    fn spaces_in_relative_paths_are_escaped() {
        let uri = resolve_uri(Some("http://h"), "/search/two words").unwrap();
        assert_eq!(uri.path(), "/search/two%20words");
    }

    #[test]
    fn relative_path_without_base_is_invalid() {
        let err = resolve_uri(None, "/items").unwrap_err();
        assert!(matches!(err, RestError::InvalidUri { .. }));
    }

    #[test]
    fn malformed_absolute_uri_is_invalid() {
        let err = resolve_uri(Some("http://h"), "http://[::1").unwrap_err();
        assert!(matches!(err, RestError::InvalidUri { .. }));
    }

    #[test]
    fn sequence_numbers_increase() {
        let counter = SequenceCounter::new();
        let shared = counter.clone();
        assert_eq!(counter.next(), 1);
        assert_eq!(shared.next(), 2);
        assert_eq!(counter.next(), 3);
    }

    #[test]
    fn verbs_dispatch_resolved_requests() {
        let script = Script::new(vec![]);
        let rest = rest("http://h/api/", &script);

        rest.get("/items", None).unwrap();
        rest.put("items/1", Entity::json(json!({"a": 1}))).unwrap();
        rest.post("items", Entity::json(json!({"a": 2}))).unwrap();
        rest.patch("items/1", Entity::json(json!({"a": 3}))).unwrap();
        rest.delete("items/1", None).unwrap();

        let sent: Vec<_> = script
            .sent()
            .into_iter()
            .map(|s| (s.method, s.uri.to_string()))
            .collect();
        assert_eq!(
            sent,
            vec![
                (Method::Get, "http://h/api/items".to_string()),
                (Method::Put, "http://h/api/items/1".to_string()),
                (Method::Post, "http://h/api/items".to_string()),
                (Method::Patch, "http://h/api/items/1".to_string()),
                (Method::Delete, "http://h/api/items/1".to_string()),
            ]
        );
    }

    #[test]
    fn post_without_payload_sends_no_body() {
        let script = Script::new(vec![]);
        let rest = rest("http://h", &script);
        rest.post("/jobs/7/run", None).unwrap();

        let sent = script.sent();
        assert_eq!(sent[0].method, Method::Post);
        assert!(sent[0].body.is_none());
        assert!(!sent[0].headers.contains("Content-Length"));
    }

    #[test]
    fn get_and_delete_carry_a_payload() {
        let script = Script::new(vec![]);
        let rest = rest("http://h", &script);
        rest.get("/search", Entity::json(json!({"q": "bolt"}))).unwrap();
        rest.delete("/items", Some(Entity::json(json!(["a", "b"])))).unwrap();

        let sent = script.sent();
        assert_eq!(sent[0].method, Method::Get);
        assert_eq!(sent[0].body.as_deref(), Some(&br#"{"q":"bolt"}"#[..]));
        assert_eq!(sent[1].method, Method::Delete);
        assert_eq!(sent[1].body.as_deref(), Some(&br#"["a","b"]"#[..]));
    }

    #[test]
    fn verb_customizers_edit_the_request() {
        let script = Script::new(vec![]);
        let rest = rest("http://h", &script);
        rest.get_with("/a", None, |r| r.add_header("X-Verb", "get")).unwrap();
        rest.put_with("/a", Entity::json(json!(1)), |r| r.add_header("X-Verb", "put")).unwrap();
        rest.post_with("/a", None, |r| r.add_header("X-Verb", "post")).unwrap();
        rest.patch_with("/a", None, |r| r.add_header("X-Verb", "patch")).unwrap();
        rest.delete_with("/a", None, |r| r.add_header("X-Verb", "delete")).unwrap();

        let verbs: Vec<_> = script
            .sent()
            .iter()
            .map(|s| s.headers.get("X-Verb").unwrap_or_default().to_string())
            .collect();
        assert_eq!(verbs, vec!["get", "put", "post", "patch", "delete"]);
    }

    #[test]
    fn facade_keeps_the_engine_chosen_at_construction() {
        engine::set_default_engine(engine::EngineKind::Client);
        let first = Rest::new().unwrap();
        engine::set_default_engine(engine::EngineKind::Minimal);
        let second = Rest::new().unwrap();
        engine::use_full_client();
        let third = Rest::new().unwrap();
        engine::set_default_engine(engine::EngineKind::Minimal);

        assert_eq!(first.engine().name(), "client");
        assert_eq!(second.engine().name(), "minimal");
        assert_eq!(third.engine().name(), "client");
        assert_eq!(engine::default_engine(), engine::EngineKind::Minimal);
    }

    #[test]
    fn customizer_runs_before_sending() {
        let script = Script::new(vec![]);
        let rest = rest("http://h", &script);
        rest.execute_with(Method::Get, "/items", None, |request| {
            request.add_header("If-None-Match", "\"v1\"");
        })
        .unwrap();
        assert_eq!(script.sent()[0].headers.get("If-None-Match"), Some("\"v1\""));
    }

    #[test]
    fn registry_tracks_unconsumed_responses() {
        let script = Script::new(vec![]);
        let rest = rest("http://h", &script);

        let mut first = rest.get("/a", None).unwrap();
        let second = rest.get("/b", None).unwrap();
        assert_eq!(rest.registry().len(), 2);

        first.consume();
        first.consume();
        assert_eq!(rest.registry().len(), 1);
        drop(second);
        assert!(rest.registry().is_empty());
    }

    #[test]
    fn invalid_uri_registers_nothing() {
        let script = Script::new(vec![]);
        let rest = Rest::with_engine(RestConfig::default(), move |_| {
            Ok(Arc::new(ScriptedEngine::new(script)) as Arc<dyn Engine>)
        })
        .unwrap();
        assert!(matches!(rest.get("items", None).unwrap_err(), RestError::InvalidUri { .. }));
        assert!(rest.registry().is_empty());
    }

    #[test]
    fn basic_auth_from_config_is_applied() {
        let script = Script::new(vec![]);
        let engine_script = script.clone();
        let config = RestConfig::from_toml_str(
            r#"
            base_uri = "http://h"
            [auth]
            scheme = "basic"
            username = "u"
            password = "p"
            "#,
        )
        .unwrap();
        let rest = Rest::with_engine(config, move |_| {
            Ok(Arc::new(ScriptedEngine::new(engine_script)) as Arc<dyn Engine>)
        })
        .unwrap();

        rest.get("/secure", None).unwrap();
        assert_eq!(script.sent()[0].headers.get("Authorization"), Some("Basic dTpw"));
    }

    #[test]
    fn reset_removes_credentials() {
        let script = Script::new(vec![]);
        let rest = rest("http://h", &script);
        rest.set_basic_auth("u", "p").unwrap();
        rest.reset().unwrap();
        rest.get("/open", None).unwrap();
        assert!(!script.sent()[0].headers.contains("Authorization"));
    }

    #[test]
    fn base_uri_can_change_after_construction() {
        let script = Script::new(vec![]);
        let rest = rest("http://old", &script);
        rest.set_base_uri("http://new/v2");
        assert_eq!(rest.base_uri().as_deref(), Some("http://new/v2"));
        rest.get("items", None).unwrap();
        assert_eq!(script.sent()[0].uri.as_str(), "http://new/v2/items");
    }

    #[test]
    fn engine_follows_config_override() {
        let rest = Rest::from_config(RestConfig::default().with_engine(engine::EngineKind::Client)).unwrap();
        assert_eq!(rest.engine().name(), "client");
        let rest = Rest::from_config(RestConfig::default().with_engine(engine::EngineKind::Minimal)).unwrap();
        assert_eq!(rest.engine().name(), "minimal");
    }
}
