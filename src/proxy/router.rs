//! Path-based dispatch to per-rule proxy handlers

use crate::config::Config;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::events::ErrorEvents;
use crate::proxy::rule::{ProxyRule, RuleTable, Transport};
use crate::proxy::upstream::ProxyHandler;
use std::time::Duration;

/// A rule and the handler that owns its connection and listener state.
pub struct Route {
    rule: ProxyRule,
    handler: ProxyHandler,
}

impl Route {
    pub fn rule(&self) -> &ProxyRule {
        &self.rule
    }

    pub fn handler(&self) -> &ProxyHandler {
        &self.handler
    }

    /// WebSocket handshakes are tunnelled only on WebSocket rules.
    pub fn tunnels(&self, request: &Request) -> bool {
        self.rule.transport() == Transport::WebSocket && request.is_websocket_upgrade()
    }
}

/// Read-only after construction; shared across connection tasks.
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(table: RuleTable) -> Self {
        Self::with_timeouts(table, None, None)
    }

    /// Builds one handler per rule and runs each rule's configure hook
    /// against its own handler.
    pub fn with_timeouts(
        table: RuleTable,
        connect_timeout: Option<Duration>,
        request_timeout: Option<Duration>,
    ) -> Self {
        let routes = table
            .into_rules()
            .into_iter()
            .map(|rule| {
                let mut handler = ProxyHandler::new(rule.target().clone(), rule.changes_origin())
                    .with_timeouts(connect_timeout, request_timeout);

                if let Some(hook) = rule.configure_hook() {
                    let events: &mut dyn ErrorEvents = &mut handler;
                    hook(events);
                }

                tracing::debug!(
                    pattern = rule.pattern(),
                    target_url = %rule.target(),
                    change_origin = rule.changes_origin(),
                    listeners = handler.events().listener_count(),
                    "Proxy rule ready"
                );

                Route { rule, handler }
            })
            .collect();

        Self { routes }
    }

    pub fn from_config(config: &Config) -> Result<Self, crate::config::ConfigError> {
        Ok(Self::with_timeouts(
            config.rule_table()?,
            config.server.connect_timeout(),
            config.server.request_timeout(),
        ))
    }

    /// First route whose pattern matches the request path.
    pub fn route(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.rule.matches(path))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Forward a plain HTTP request.
    ///
    /// `None` means no rule claimed the path and the caller should serve it
    /// itself.
    pub async fn forward(&self, request: &Request) -> Option<Response> {
        let route = self.route(&request.path)?;
        Some(route.handler.forward_request(request).await)
    }
}
