//! Engine on a full-featured client (reqwest) shared across requests.
//!
//! # Design
//! The engine owns a `Session`: one `reqwest::blocking::Client` (connection
//! pool plus cookie store) and an auth cache. Every request of the engine
//! sends through that client, so connections, cookies and preemptive Basic
//! credentials carry over from one request to the next. `reset()` throws the
//! whole session away.
//!
//! Proxy and timeout are client-level settings in reqwest, so the client is
//! rebuilt whenever the facade's proxy or timeout changes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use tracing::debug;
use url::Url;

use super::{Engine, Exchange, Interceptors, Outgoing, Transport};
use crate::config::{ProxyConfig, Settings, SharedSettings};
use crate::entity::Entity;
use crate::error::{RestError, Result};
use crate::http::{Headers, Method};
use crate::request::Request;

/// Scheme, host and port a set of credentials applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AuthScope {
    scheme: String,
    host: String,
    port: u16,
}

impl AuthScope {
    fn of(uri: &Url) -> Option<Self> {
        Some(AuthScope {
            scheme: uri.scheme().to_ascii_lowercase(),
            host: uri.host_str()?.to_ascii_lowercase(),
            port: uri.port_or_known_default()?,
        })
    }
}

#[derive(Debug, Clone)]
struct CachedCredentials {
    scope: AuthScope,
    username: String,
    password: String,
}

/// What the client was built for; a change forces a rebuild.
#[derive(Debug, Clone, PartialEq)]
struct Route {
    proxy: Option<String>,
    timeout: Option<Duration>,
}

impl Route {
    fn of(settings: &Settings) -> Self {
        // The proxy is addressed with the scheme of the base URI.
        let proxy = settings.proxy.as_ref().map(|proxy: &ProxyConfig| {
            let secure = settings
                .base_uri
                .as_deref()
                .is_some_and(|base| base.starts_with("https"));
            let scheme = if secure { "https" } else { "http" };
            format!("{scheme}://{}", proxy.authority())
        });
        Route {
            proxy,
            timeout: settings.timeout,
        }
    }

    fn client(&self) -> Result<Client> {
        let mut builder = Client::builder().cookie_store(true);
        builder = match &self.proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.as_str()).map_err(RestError::transport)?),
            None => builder.no_proxy(),
        };
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().map_err(RestError::transport)
    }
}

#[derive(Debug)]
struct Session {
    client: Client,
    route: Route,
    credentials: Option<CachedCredentials>,
}

impl Session {
    fn open(settings: &Settings) -> Result<Self> {
        let route = Route::of(settings);
        Ok(Session {
            client: route.client()?,
            route,
            credentials: None,
        })
    }

    fn client_for(&mut self, settings: &Settings) -> Result<Client> {
        let route = Route::of(settings);
        if route != self.route {
            debug!(proxy = ?route.proxy, "rebuilding HTTP client for new route");
            self.client = route.client()?;
            self.route = route;
        }
        Ok(self.client.clone())
    }
}

#[derive(Debug)]
pub struct ClientEngine {
    settings: SharedSettings,
    interceptors: Arc<Interceptors>,
    session: Arc<Mutex<Session>>,
}

impl ClientEngine {
    pub fn new(settings: SharedSettings) -> Result<Self> {
        let session = Session::open(&settings.read())?;
        Ok(Self {
            settings,
            interceptors: Arc::default(),
            session: Arc::new(Mutex::new(session)),
        })
    }
}

impl Engine for ClientEngine {
    fn name(&self) -> &'static str {
        "client"
    }

    fn interceptors(&self) -> &Arc<Interceptors> {
        &self.interceptors
    }

    fn request(&self, seq: u64, method: Method, uri: Url, entity: Option<Entity>) -> Result<Request> {
        let transport = ClientTransport {
            settings: self.settings.clone(),
            session: self.session.clone(),
        };
        Ok(Request::new(
            seq,
            method,
            uri,
            entity,
            self.interceptors.clone(),
            Box::new(transport),
        ))
    }

    /// Cache credentials for the base URI's host; requests to that host get
    /// an `Authorization: Basic` header without waiting for a challenge.
    fn set_basic_auth(&self, username: &str, password: &str) -> Result<()> {
        let settings = self.settings.read().clone();
        let base = settings.base_uri.as_deref().ok_or(RestError::MissingBaseUri)?;
        let uri = Url::parse(base).map_err(|source| RestError::InvalidUri {
            uri: base.to_string(),
            source,
        })?;
        let scope = AuthScope::of(&uri).ok_or(RestError::MissingBaseUri)?;

        let mut session = self.session.lock();
        session.client = session.route.client()?;
        session.credentials = Some(CachedCredentials {
            scope,
            username: username.to_string(),
            password: password.to_string(),
        });
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let fresh = Session::open(&self.settings.read())?;
        *self.session.lock() = fresh;
        self.interceptors.clear();
        Ok(())
    }
}

struct ClientTransport {
    settings: SharedSettings,
    session: Arc<Mutex<Session>>,
}

impl Transport for ClientTransport {
    fn reset(&mut self) -> Result<()> {
        // Every send builds a fresh request object; the pooled connection
        // state belongs to the engine.
        Ok(())
    }

    fn send(&mut self, outgoing: Outgoing<'_>) -> Result<Exchange> {
        let settings = self.settings.read().clone();
        let (client, credentials) = {
            let mut session = self.session.lock();
            (session.client_for(&settings)?, session.credentials.clone())
        };

        let method = match outgoing.method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
            Method::Patch => reqwest::Method::PATCH,
        };
        let mut builder = client.request(method, outgoing.uri.clone());
        for (name, value) in outgoing.headers.iter() {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name, value);
        }
        if let Some(cached) = credentials {
            let in_scope = AuthScope::of(outgoing.uri).as_ref() == Some(&cached.scope);
            if in_scope && !outgoing.headers.contains("Authorization") {
                builder = builder.basic_auth(&cached.username, Some(&cached.password));
            }
        }
        if let Some(body) = outgoing.body {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().map_err(RestError::transport)?;
        let status = response.status();
        let headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();
        Ok(Exchange {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: Box::new(response),
        })
    }
}
