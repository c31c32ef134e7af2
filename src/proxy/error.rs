//! Proxy-layer errors
//!
//! Messages follow the socket error wording browsers' dev tooling and
//! backend developers already recognise (`connect ECONNREFUSED 127.0.0.1:3001`,
//! `socket hang up`), since error listeners filter on the message text.

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Nothing listening on the backend address yet.
    #[error("connect ECONNREFUSED {}", display_addr(.0))]
    ConnectionRefused(SocketAddr),

    /// Backend host name did not resolve.
    #[error("getaddrinfo ENOTFOUND {0}")]
    HostNotFound(String),

    /// Connect attempt exceeded the configured limit.
    #[error("connect ETIMEDOUT {0}")]
    ConnectTimeout(String),

    /// Backend accepted the request but did not answer in time.
    #[error("backend {0} did not respond in time")]
    ResponseTimeout(String),

    /// Backend closed the connection before a full response.
    #[error("socket hang up")]
    HangUp,

    /// Backend sent something that is not HTTP/1.x.
    #[error("invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProxyError::ConnectTimeout(_) | ProxyError::ResponseTimeout(_)
        )
    }
}

/// `ip:port` without brackets around IPv6 hosts.
fn display_addr(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_message_matches_socket_wording() {
        let err = ProxyError::ConnectionRefused("127.0.0.1:3001".parse().unwrap());
        assert_eq!(err.to_string(), "connect ECONNREFUSED 127.0.0.1:3001");

        let err = ProxyError::ConnectionRefused("[::1]:3001".parse().unwrap());
        assert_eq!(err.to_string(), "connect ECONNREFUSED ::1:3001");
    }
}
