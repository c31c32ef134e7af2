//! Proxy rules and the ordered rule table
//!
//! A rule pairs a path regex with a backend origin. Rules are matched in
//! declaration order and the first match wins.

use crate::proxy::events::{configure_proxy, ErrorEvents};
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// API and health-check traffic.
pub const API_PATTERN: &str = "^/(api|health-check).*";
pub const API_TARGET: &str = "http://localhost:3001";

/// WebSocket traffic.
pub const WEBSOCKET_PATTERN: &str = "^/websocket";
pub const WEBSOCKET_TARGET: &str = "ws://localhost:3002";

/// Hook run once against a rule's handler when the router is built.
pub type ConfigureHook = Arc<dyn Fn(&mut dyn ErrorEvents) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid path pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid target {target:?}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported target scheme {0:?} (expected http or ws)")]
    UnsupportedScheme(String),

    #[error("target {0:?} has no host")]
    MissingHost(String),
}

/// How the backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    WebSocket,
}

#[derive(Clone)]
pub struct ProxyRule {
    pattern: Regex,
    target: Url,
    change_origin: bool,
    configure: Option<ConfigureHook>,
}

impl ProxyRule {
    /// Compiles `pattern` and parses `target`.
    ///
    /// Targets must be `http://` or `ws://` with a host.
    pub fn new(pattern: &str, target: &str) -> Result<Self, RuleError> {
        let regex = Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let url = Url::parse(target).map_err(|source| RuleError::InvalidTarget {
            target: target.to_string(),
            source,
        })?;

        match url.scheme() {
            "http" | "ws" => {}
            other => return Err(RuleError::UnsupportedScheme(other.to_string())),
        }

        if url.host_str().is_none() {
            return Err(RuleError::MissingHost(target.to_string()));
        }

        Ok(Self {
            pattern: regex,
            target: url,
            change_origin: false,
            configure: None,
        })
    }

    /// Rewrite `Host`/`Origin` to the target when forwarding.
    pub fn change_origin(mut self, change_origin: bool) -> Self {
        self.change_origin = change_origin;
        self
    }

    pub fn configure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut dyn ErrorEvents) + Send + Sync + 'static,
    {
        self.configure = Some(Arc::new(hook));
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn changes_origin(&self) -> bool {
        self.change_origin
    }

    pub fn configure_hook(&self) -> Option<&ConfigureHook> {
        self.configure.as_ref()
    }

    pub fn transport(&self) -> Transport {
        transport_of(&self.target)
    }
}

impl fmt::Debug for ProxyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRule")
            .field("pattern", &self.pattern.as_str())
            .field("target", &self.target.as_str())
            .field("change_origin", &self.change_origin)
            .field("configure", &self.configure.is_some())
            .finish()
    }
}

pub(crate) fn transport_of(target: &Url) -> Transport {
    match target.scheme() {
        "ws" | "wss" => Transport::WebSocket,
        _ => Transport::Http,
    }
}

/// `host[:port]` as it should appear in a forwarded `Host` header.
pub fn target_authority(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default();
    match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Origin a browser would send for pages served by `target`.
///
/// WebSocket schemes map onto their HTTP counterparts.
pub fn target_origin(target: &Url) -> String {
    let scheme = match target.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    };
    format!("{}://{}", scheme, target_authority(target))
}

/// Ordered, immutable set of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<ProxyRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<ProxyRule>) -> Self {
        Self { rules }
    }

    /// The dev server's two rules: API/health-check to port 3001 and
    /// WebSocket to port 3002, both origin-rewriting with the stock hook.
    pub fn dev_defaults() -> Result<Self, RuleError> {
        Ok(Self::new(vec![
            ProxyRule::new(API_PATTERN, API_TARGET)?
                .change_origin(true)
                .configure(configure_proxy),
            ProxyRule::new(WEBSOCKET_PATTERN, WEBSOCKET_TARGET)?
                .change_origin(true)
                .configure(configure_proxy),
        ]))
    }

    /// First rule whose pattern matches `path`.
    pub fn match_path(&self, path: &str) -> Option<&ProxyRule> {
        self.position(path).map(|i| &self.rules[i])
    }

    pub fn position(&self, path: &str) -> Option<usize> {
        self.rules.iter().position(|rule| rule.matches(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn into_rules(self) -> Vec<ProxyRule> {
        self.rules
    }
}
