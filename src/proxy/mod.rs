//! Reverse proxy functionality
//!
//! Rule matching, request forwarding, WebSocket tunnelling and the error
//! listener hooks that decide which proxy failures are worth reporting.

pub mod error;
pub mod events;
pub mod router;
pub mod rule;
pub mod tunnel;
pub mod upstream;

pub use error::ProxyError;
pub use events::{configure_proxy, configure_proxy_with, DiagnosticSink, ErrorEvents, ProxyEvents};
pub use router::{Route, Router};
pub use rule::{ProxyRule, RuleTable, Transport};
pub use upstream::ProxyHandler;
