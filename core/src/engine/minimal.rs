//! Engine on a minimal blocking client (ureq), one connection per request.
//!
//! Each request owns its own agent, configured from the facade's proxy and
//! timeout at build time; `reset()` on the request replaces the agent. Status
//! codes are never turned into errors and bodies are left compressed, so the
//! shared response code sees exactly what the server sent.

use std::sync::Arc;
use std::time::Duration;

use ureq::typestate::{WithBody, WithoutBody};
use ureq::{Agent, RequestBuilder};
use url::Url;

use super::{basic_auth_interceptor, Engine, Exchange, Interceptors, Outgoing, Transport};
use crate::config::{ProxyConfig, SharedSettings};
use crate::entity::Entity;
use crate::error::{RestError, Result};
use crate::http::{Headers, Method};
use crate::request::Request;

#[derive(Debug)]
pub struct MinimalEngine {
    settings: SharedSettings,
    interceptors: Arc<Interceptors>,
}

impl MinimalEngine {
    pub fn new(settings: SharedSettings) -> Self {
        Self {
            settings,
            interceptors: Arc::default(),
        }
    }
}

impl Engine for MinimalEngine {
    fn name(&self) -> &'static str {
        "minimal"
    }

    fn interceptors(&self) -> &Arc<Interceptors> {
        &self.interceptors
    }

    fn request(&self, seq: u64, method: Method, uri: Url, entity: Option<Entity>) -> Result<Request> {
        let (proxy, timeout) = {
            let settings = self.settings.read();
            (settings.proxy.clone(), settings.timeout)
        };
        let transport = MinimalTransport::new(proxy, timeout)?;
        Ok(Request::new(
            seq,
            method,
            uri,
            entity,
            self.interceptors.clone(),
            Box::new(transport),
        ))
    }

    fn set_basic_auth(&self, username: &str, password: &str) -> Result<()> {
        self.interceptors
            .set_request(Some(basic_auth_interceptor(username, password)));
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.interceptors.clear();
        Ok(())
    }
}

struct MinimalTransport {
    agent: Agent,
    proxy: Option<ProxyConfig>,
    timeout: Option<Duration>,
}

impl MinimalTransport {
    fn new(proxy: Option<ProxyConfig>, timeout: Option<Duration>) -> Result<Self> {
        let agent = open_agent(proxy.as_ref(), timeout)?;
        Ok(Self { agent, proxy, timeout })
    }
}

fn open_agent(proxy: Option<&ProxyConfig>, timeout: Option<Duration>) -> Result<Agent> {
    let proxy = proxy
        .map(|p| ureq::Proxy::new(&format!("http://{}", p.authority())))
        .transpose()
        .map_err(RestError::transport)?;
    Ok(Agent::config_builder()
        .http_status_as_error(false)
        .proxy(proxy)
        .timeout_global(timeout)
        .build()
        .new_agent())
}

impl Transport for MinimalTransport {
    fn reset(&mut self) -> Result<()> {
        self.agent = open_agent(self.proxy.as_ref(), self.timeout)?;
        Ok(())
    }

    fn send(&mut self, outgoing: Outgoing<'_>) -> Result<Exchange> {
        let uri = outgoing.uri.as_str();
        let result = match outgoing.method {
            Method::Get => send_without_body(self.agent.get(uri), &outgoing),
            Method::Delete => send_without_body(self.agent.delete(uri), &outgoing),
            Method::Put => send_with_body(self.agent.put(uri), &outgoing),
            Method::Post => send_with_body(self.agent.post(uri), &outgoing),
            Method::Patch => send_with_body(self.agent.patch(uri), &outgoing),
        };
        let response = result.map_err(RestError::transport)?;

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
            body: Box::new(response.into_body().into_reader()),
        })
    }
}

type UreqResponse = std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error>;

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &Headers) -> RequestBuilder<B> {
    for (name, value) in headers.iter() {
        // ureq frames the body itself
        if name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
}

fn send_without_body(builder: RequestBuilder<WithoutBody>, outgoing: &Outgoing<'_>) -> UreqResponse {
    let builder = with_headers(builder, outgoing.headers);
    match outgoing.body {
        Some(body) => builder.force_send_body().send(body),
        None => builder.call(),
    }
}

fn send_with_body(builder: RequestBuilder<WithBody>, outgoing: &Outgoing<'_>) -> UreqResponse {
    let builder = with_headers(builder, outgoing.headers);
    match outgoing.body {
        Some(body) => builder.send(body),
        None => builder.send_empty(),
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::RwLock;

    use super::*;
    use crate::config::Settings;

    fn engine() -> MinimalEngine {
        MinimalEngine::new(Arc::new(RwLock::new(Settings::default())))
    }

    #[test]
    fn basic_auth_installs_a_request_interceptor() {
        let engine = engine();
        engine.set_basic_auth("u", "p").unwrap();
        assert!(engine.interceptors().request().is_some());

        let mut request = engine
            .request(1, Method::Get, Url::parse("http://localhost/").unwrap(), None)
            .unwrap();
        let interceptor = engine.interceptors().request().unwrap();
        interceptor(&mut request);
        assert_eq!(request.header("Authorization"), Some("Basic dTpw"));
    }

    #[test]
    fn reset_reverts_to_unauthenticated() {
        let engine = engine();
        engine.set_basic_auth("u", "p").unwrap();
        engine.set_digest_auth("u", "p");
        engine.reset().unwrap();
        assert!(engine.interceptors().request().is_none());
        assert!(engine.interceptors().response().is_none());
    }

    #[test]
    fn proxy_is_accepted_at_build_time() {
        let settings = Settings {
            proxy: Some(ProxyConfig::new("127.0.0.1", 3128)),
            ..Settings::default()
        };
        let engine = MinimalEngine::new(Arc::new(RwLock::new(settings)));
        assert!(engine
            .request(1, Method::Get, Url::parse("http://localhost/").unwrap(), None)
            .is_ok());
    }
}
