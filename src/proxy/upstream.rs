//! Upstream connection and request forwarding
//!
//! This module handles connecting to a rule's backend and relaying one
//! HTTP request/response exchange. Failures are emitted to the handler's
//! error listeners and turned into a gateway error for the client; they
//! never escape the connection they happened on.

use crate::http::chunked::{decode_chunked, ChunkError};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::error::ProxyError;
use crate::proxy::events::{ErrorEvents, ErrorListener, ProxyEvents};
use crate::proxy::rule::{target_authority, target_origin};
use bytes::{Buf, BytesMut};
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use url::Url;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Largest response header block accepted from a backend.
const MAX_RESPONSE_HEADER_BYTES: usize = 64 * 1024;

/// Headers that describe a single hop and are never forwarded as-is.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Forwards requests for one rule to its backend.
pub struct ProxyHandler {
    target: Url,
    change_origin: bool,
    events: ProxyEvents,
    /// Unset means the OS connect timeout applies
    connect_timeout: Option<Duration>,
    /// Unset means wait as long as the backend takes
    request_timeout: Option<Duration>,
}

impl ProxyHandler {
    /// Create a handler with the stock logging error listener installed.
    pub fn new(target: Url, change_origin: bool) -> Self {
        let events = ProxyEvents::with_default_listener(target.as_str());
        Self {
            target,
            change_origin,
            events,
            connect_timeout: None,
            request_timeout: None,
        }
    }

    pub fn with_timeouts(
        mut self,
        connect_timeout: Option<Duration>,
        request_timeout: Option<Duration>,
    ) -> Self {
        self.connect_timeout = connect_timeout;
        self.request_timeout = request_timeout;
        self
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn events(&self) -> &ProxyEvents {
        &self.events
    }

    /// Forward `request` and always produce something to send back.
    ///
    /// Errors go to the error listeners; the client gets 504 for timeouts
    /// and 502 for everything else. No retry.
    pub async fn forward_request(&self, request: &Request) -> Response {
        match self.proxy(request).await {
            Ok(response) => {
                tracing::debug!(
                    target_url = %self.target,
                    status = response.status.as_u16(),
                    method = request.method.as_str(),
                    path = %request.path,
                    "Request forwarded"
                );
                response
            }
            Err(e) => {
                self.events.emit_error(&e);
                error_response(&e)
            }
        }
    }

    /// Forward `request` and return the backend's response or the failure.
    pub async fn proxy(&self, request: &Request) -> Result<Response, ProxyError> {
        let mut stream = self.connect().await?;

        tracing::trace!(target_url = %self.target, "Connected to backend");

        within(
            self.request_timeout,
            self.exchange(&mut stream, request),
            || ProxyError::ResponseTimeout(target_authority(&self.target)),
        )
        .await
    }

    async fn exchange(&self, stream: &mut TcpStream, request: &Request) -> Result<Response, ProxyError> {
        let request_bytes = self.build_http_request(request);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        read_http_response(stream, request.method).await
    }

    /// Open a TCP connection to the target.
    ///
    /// Every resolved address is tried in order; if all fail,
    /// [`select_connect_error`] decides which failure is returned.
    pub async fn connect(&self) -> Result<TcpStream, ProxyError> {
        let host = self.target.host_str().unwrap_or_default().to_string();
        let port = self.target.port_or_known_default().unwrap_or(80);

        let addrs: Vec<_> = lookup_host(format!("{}:{}", host, port))
            .await
            .map_err(|_| ProxyError::HostNotFound(host.clone()))?
            .collect();

        let mut failures = Vec::new();

        for addr in addrs {
            let attempt = within(
                self.connect_timeout,
                async { TcpStream::connect(addr).await.map_err(ProxyError::from) },
                || ProxyError::ConnectTimeout(addr.to_string()),
            )
            .await;

            match attempt {
                Ok(stream) => return Ok(stream),
                Err(ProxyError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    failures.push(ProxyError::ConnectionRefused(addr));
                }
                Err(e) => failures.push(e),
            }
        }

        Err(select_connect_error(failures).unwrap_or(ProxyError::HostNotFound(host)))
    }

    /// Build HTTP request bytes to send to the backend.
    ///
    /// Hop-by-hop headers are dropped and `Connection: close` is added, so
    /// each forwarded request gets its own backend connection.
    pub fn build_http_request(&self, request: &Request) -> Vec<u8> {
        let mut headers = self.forwarded_headers(request, false);
        headers.push(("Connection".to_string(), "close".to_string()));

        serialize_request(request, &headers, true)
    }

    /// Build the WebSocket opening handshake for the backend, keeping the
    /// `Connection`/`Upgrade` pair the handshake depends on.
    pub fn build_upgrade_request(&self, request: &Request) -> Vec<u8> {
        let headers = self.forwarded_headers(request, true);
        serialize_request(request, &headers, false)
    }

    fn forwarded_headers(&self, request: &Request, keep_upgrade: bool) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter(|(name, _)| {
                let lower = name.to_ascii_lowercase();
                let upgrade_pair = lower == "connection" || lower == "upgrade";
                !HOP_BY_HOP.contains(&lower.as_str()) || (keep_upgrade && upgrade_pair)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if self.change_origin {
            set_header(&mut headers, "Host", target_authority(&self.target));
            if let Some(origin) = headers
                .iter_mut()
                .find(|(name, _)| name.eq_ignore_ascii_case("Origin"))
            {
                origin.1 = target_origin(&self.target);
            }
        }

        headers
    }
}

impl ErrorEvents for ProxyHandler {
    fn remove_all_error_listeners(&mut self) {
        self.events.remove_all_error_listeners();
    }

    fn on_error(&mut self, listener: ErrorListener) {
        self.events.on_error(listener);
    }
}

/// Gateway response for a failed forward.
pub fn error_response(error: &ProxyError) -> Response {
    if error.is_timeout() {
        Response::gateway_timeout()
    } else {
        Response::bad_gateway()
    }
}

async fn within<T, F, E>(limit: Option<Duration>, fut: F, on_elapsed: E) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
    E: FnOnce() -> ProxyError,
{
    match limit {
        Some(limit) => timeout(limit, fut).await.map_err(|_| on_elapsed())?,
        None => fut.await,
    }
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value));
}

fn serialize_request(request: &Request, headers: &[(String, String)], with_body: bool) -> Vec<u8> {
    let mut buffer = Vec::new();

    let path = if request.path.is_empty() {
        "/"
    } else {
        &request.path
    };

    buffer.extend_from_slice(
        format!("{} {} {}\r\n", request.method.as_str(), path, request.version).as_bytes(),
    );

    for (key, value) in headers {
        buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
    }

    buffer.extend_from_slice(b"\r\n");

    if with_body && !request.body.is_empty() {
        buffer.extend_from_slice(&request.body);
    }

    buffer
}

/// Read one HTTP response from the backend.
async fn read_http_response(
    stream: &mut TcpStream,
    method: Method,
) -> Result<Response, ProxyError> {
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let n = stream.read_buf(&mut buffer).await?;

        if n == 0 {
            return Err(ProxyError::HangUp);
        }

        if let Some(headers_end) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            let headers_bytes = buffer.split_to(headers_end + 4);
            let (status, mut headers) = parse_response_head(&headers_bytes)?;

            let chunked = take_header(&mut headers, "Transfer-Encoding")
                .map(|v| v.to_ascii_lowercase().contains("chunked"))
                .unwrap_or(false);
            take_header(&mut headers, "Connection");
            take_header(&mut headers, "Keep-Alive");

            let body = if method == Method::HEAD || status.forbids_body() {
                Vec::new()
            } else if chunked {
                take_header(&mut headers, "Content-Length");
                let raw = read_to_close(stream, &mut buffer).await?;
                decode_chunked_body(&raw)?
            } else {
                match header_value(&headers, "Content-Length") {
                    Some(len) => {
                        let len = len.parse::<usize>().map_err(|_| {
                            ProxyError::InvalidResponse(format!("bad Content-Length {:?}", len))
                        })?;
                        read_exact_body(stream, &mut buffer, len).await?
                    }
                    None => read_to_close(stream, &mut buffer).await?,
                }
            };

            return Ok(ResponseBuilder::new(status)
                .headers(headers)
                .body(body)
                .build());
        }

        if buffer.len() > MAX_RESPONSE_HEADER_BYTES {
            return Err(ProxyError::InvalidResponse(
                "response headers too large".to_string(),
            ));
        }
    }
}

/// Status and headers of a backend response. Repeated headers
/// (`Set-Cookie` above all) are kept as separate entries in arrival order.
fn parse_response_head(
    headers_bytes: &[u8],
) -> Result<(StatusCode, Vec<(String, String)>), ProxyError> {
    let headers_str = std::str::from_utf8(headers_bytes)
        .map_err(|_| ProxyError::InvalidResponse("non UTF-8 headers".to_string()))?;

    let mut lines = headers_str.lines();

    let status_line = lines
        .next()
        .ok_or_else(|| ProxyError::InvalidResponse("empty response".to_string()))?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();

    if parts.len() < 2 || !parts[0].starts_with("HTTP/") {
        return Err(ProxyError::InvalidResponse(format!(
            "invalid status line {:?}",
            status_line
        )));
    }

    let code: u16 = parts[1].parse().map_err(|_| {
        ProxyError::InvalidResponse(format!("invalid status code {:?}", parts[1]))
    })?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok((StatusCode::from_u16(code), headers))
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Remove every `name` header, returning the first value.
fn take_header(headers: &mut Vec<(String, String)>, name: &str) -> Option<String> {
    let first = header_value(headers, name).map(str::to_string);
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    first
}

async fn read_exact_body(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    content_length: usize,
) -> Result<Vec<u8>, ProxyError> {
    let mut body = Vec::with_capacity(content_length);

    let from_buffer = buffer.len().min(content_length);
    body.extend_from_slice(&buffer[..from_buffer]);
    buffer.advance(from_buffer);

    let mut chunk = [0u8; BUFFER_SIZE];
    while body.len() < content_length {
        let to_read = (content_length - body.len()).min(BUFFER_SIZE);
        let n = stream.read(&mut chunk[..to_read]).await?;

        if n == 0 {
            return Err(ProxyError::HangUp);
        }

        body.extend_from_slice(&chunk[..n]);
    }

    Ok(body)
}

async fn read_to_close(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<Vec<u8>, ProxyError> {
    let mut body = buffer.split().to_vec();
    stream.read_to_end(&mut body).await?;
    Ok(body)
}

/// Decode a chunked body read up to connection close.
///
/// Running out of bytes means the backend hung up mid-body.
pub fn decode_chunked_body(raw: &[u8]) -> Result<Vec<u8>, ProxyError> {
    match decode_chunked(raw) {
        Ok((body, _)) => Ok(body),
        Err(ChunkError::Incomplete) => Err(ProxyError::HangUp),
        Err(ChunkError::Invalid(reason)) => Err(ProxyError::InvalidResponse(reason)),
    }
}

/// Pick the error to emit once every resolved address failed.
///
/// Defaults to the first failure. When all attempts were refused and the
/// IPv4 loopback was among them, its refusal wins, so a `localhost` target
/// that resolves `::1` first still reads as the startup race.
pub fn select_connect_error(failures: Vec<ProxyError>) -> Option<ProxyError> {
    let all_refused = failures
        .iter()
        .all(|e| matches!(e, ProxyError::ConnectionRefused(_)));

    let loopback = failures.iter().position(|e| {
        matches!(e, ProxyError::ConnectionRefused(addr) if addr.ip() == Ipv4Addr::LOCALHOST)
    });

    match loopback {
        Some(i) if all_refused => failures.into_iter().nth(i),
        _ => failures.into_iter().next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_chunked_body_with_extensions() {
        let raw = b"5;name=value\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        assert_eq!(decode_chunked_body(raw).unwrap(), b"hello world".to_vec());
    }

    #[test]
    fn truncated_chunked_body_is_a_hang_up() {
        let raw = b"a\r\nshort";
        assert!(matches!(decode_chunked_body(raw), Err(ProxyError::HangUp)));
    }

    #[test]
    fn huge_chunk_size_is_an_invalid_response() {
        let raw = b"ffffffffffffffff\r\nabc\r\n0\r\n\r\n";
        assert!(matches!(
            decode_chunked_body(raw),
            Err(ProxyError::InvalidResponse(_))
        ));
    }

    #[test]
    fn chunk_without_trailing_crlf_is_an_invalid_response() {
        let raw = b"3\r\nabcde\r\n0\r\n\r\n";
        assert!(matches!(
            decode_chunked_body(raw),
            Err(ProxyError::InvalidResponse(_))
        ));
    }

    #[test]
    fn status_line_must_be_http() {
        assert!(parse_response_head(b"SSH-2.0-OpenSSH\r\n\r\n").is_err());

        let (status, headers) =
            parse_response_head(b"HTTP/1.1 418 I'm a teapot\r\nX-Tea: yes\r\n\r\n").unwrap();
        assert_eq!(status, StatusCode::Other(418));
        assert_eq!(header_value(&headers, "x-tea"), Some("yes"));
    }

    #[test]
    fn repeated_response_headers_are_kept() {
        let (_, headers) = parse_response_head(
            b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n",
        )
        .unwrap();

        let cookies: Vec<_> = headers
            .iter()
            .filter(|(k, _)| k == "Set-Cookie")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    fn refused(addr: &str) -> ProxyError {
        ProxyError::ConnectionRefused(addr.parse().unwrap())
    }

    #[test]
    fn ipv4_loopback_refusal_is_reported_when_all_refused() {
        let picked = select_connect_error(vec![refused("[::1]:3001"), refused("127.0.0.1:3001")]);
        assert_eq!(
            picked.unwrap().to_string(),
            "connect ECONNREFUSED 127.0.0.1:3001"
        );
    }

    #[test]
    fn first_failure_is_reported_otherwise() {
        let picked = select_connect_error(vec![
            refused("[::1]:3001"),
            ProxyError::ConnectTimeout("127.0.0.1:3001".to_string()),
        ]);
        assert_eq!(picked.unwrap().to_string(), "connect ECONNREFUSED ::1:3001");

        let picked = select_connect_error(vec![refused("10.0.0.5:3001"), refused("[::1]:3001")]);
        assert_eq!(
            picked.unwrap().to_string(),
            "connect ECONNREFUSED 10.0.0.5:3001"
        );

        assert!(select_connect_error(Vec::new()).is_none());
    }
}
