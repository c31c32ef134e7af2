//! Error listeners for proxy handlers
//!
//! Each rule's handler owns a list of error listeners. A rule's configure
//! hook runs once against that handler at router initialisation; the stock
//! hook, [`configure_proxy`], replaces whatever listeners are present with a
//! single one that drops the backend-not-started-yet refusal and reports
//! everything else.

use crate::proxy::error::ProxyError;
use std::sync::Arc;

/// Text that identifies the startup race: the dev server is up but the
/// backend on the loopback address is not listening yet.
pub const STARTUP_RACE_MARKER: &str = "ECONNREFUSED 127.0.0.1";

pub type ErrorListener = Box<dyn Fn(&ProxyError) + Send + Sync>;

/// Listener registration surface handed to configure hooks.
pub trait ErrorEvents {
    fn remove_all_error_listeners(&mut self);
    fn on_error(&mut self, listener: ErrorListener);
}

/// Where reported proxy errors end up.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, error: &ProxyError);
}

/// Reports through `tracing` at error level; the binary routes that to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn report(&self, error: &ProxyError) {
        tracing::error!(error = %error, "proxy error");
    }
}

/// Listener list owned by one proxy handler.
#[derive(Default)]
pub struct ProxyEvents {
    listeners: Vec<ErrorListener>,
}

impl ProxyEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with the engine's stock listener, which logs every error
    /// tagged with the target it was proxying to.
    pub fn with_default_listener(target: impl Into<String>) -> Self {
        let target = target.into();
        let mut events = Self::new();
        events.on_error(Box::new(move |err| {
            tracing::error!(target_url = %target, error = %err, "http proxy error");
        }));
        events
    }

    /// Delivers `err` to every listener in registration order.
    pub fn emit_error(&self, err: &ProxyError) {
        if self.listeners.is_empty() {
            tracing::error!(error = %err, "unhandled proxy error");
            return;
        }

        for listener in &self.listeners {
            listener(err);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl ErrorEvents for ProxyEvents {
    fn remove_all_error_listeners(&mut self) {
        self.listeners.clear();
    }

    fn on_error(&mut self, listener: ErrorListener) {
        self.listeners.push(listener);
    }
}

impl std::fmt::Debug for ProxyEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEvents")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// True when `message` is the benign loopback refusal seen while the
/// backend is still starting.
///
/// Only the IPv4 loopback literal matches; a refusal on `::1` or any other
/// address is reported.
pub fn is_startup_race(message: &str) -> bool {
    message.contains(STARTUP_RACE_MARKER)
}

/// Stock configure hook: clear existing error listeners and install one
/// that suppresses startup-race refusals and reports the rest via `tracing`.
pub fn configure_proxy(events: &mut dyn ErrorEvents) {
    configure_proxy_with(events, Arc::new(TracingDiagnostics));
}

/// [`configure_proxy`] with an explicit diagnostic sink.
pub fn configure_proxy_with(events: &mut dyn ErrorEvents, sink: Arc<dyn DiagnosticSink>) {
    events.remove_all_error_listeners();

    events.on_error(Box::new(move |err| {
        if is_startup_race(&err.to_string()) {
            tracing::trace!(error = %err, "backend not listening yet");
            return;
        }
        sink.report(err);
    }));
}
