use devgate::http::request::{Method, Request};
use std::collections::HashMap;

fn request_with(headers: &[(&str, &str)]) -> Request {
    Request {
        method: Method::GET,
        path: "/".to_string(),
        version: "HTTP/1.1".to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        body: vec![],
    }
}

#[test]
fn test_request_header_lookup_ignores_case() {
    let req = request_with(&[("host", "localhost:3000"), ("Content-Type", "application/json")]);

    assert_eq!(req.header("Host"), Some("localhost:3000"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_content_length_parsing() {
    assert_eq!(request_with(&[("Content-Length", "42")]).content_length(), 42);
    assert_eq!(request_with(&[]).content_length(), 0);
    assert_eq!(request_with(&[("Content-Length", "many")]).content_length(), 0);
}

#[test]
fn test_request_keep_alive_defaults_by_version() {
    let mut req = request_with(&[]);
    assert!(req.keep_alive());

    req.version = "HTTP/1.0".to_string();
    assert!(!req.keep_alive());

    let mut req = request_with(&[("Connection", "Keep-Alive")]);
    req.version = "HTTP/1.0".to_string();
    assert!(req.keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    assert!(!request_with(&[("Connection", "close")]).keep_alive());
}

#[test]
fn test_request_websocket_upgrade_detection() {
    assert!(request_with(&[("Connection", "Upgrade"), ("Upgrade", "websocket")]).is_websocket_upgrade());
    // Firefox sends a token list
    assert!(
        request_with(&[("connection", "keep-alive, Upgrade"), ("upgrade", "WebSocket")])
            .is_websocket_upgrade()
    );
    assert!(!request_with(&[("Upgrade", "websocket")]).is_websocket_upgrade());
    assert!(!request_with(&[("Connection", "Upgrade"), ("Upgrade", "h2c")]).is_websocket_upgrade());
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("PATCH"), Some(Method::PATCH));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None);
    assert_eq!(Method::DELETE.as_str(), "DELETE");
}
