//! Routing table behaviour

use devgate::http::request::{Method, RequestBuilder};
use devgate::http::response::StatusCode;
use devgate::proxy::router::Router;
use devgate::proxy::rule::{ProxyRule, RuleTable, Transport};

#[test]
fn test_api_and_health_check_go_to_http_backend() {
    let table = RuleTable::dev_defaults().unwrap();

    for path in [
        "/api",
        "/api/users",
        "/api/users?page=2",
        "/apiary",
        "/health-check",
        "/health-check/db",
    ] {
        let rule = table.match_path(path).unwrap_or_else(|| panic!("{} not routed", path));
        assert_eq!(rule.target().as_str(), "http://localhost:3001/", "{}", path);
        assert_eq!(rule.transport(), Transport::Http);
        assert!(rule.changes_origin());
    }
}

#[test]
fn test_websocket_paths_go_to_ws_backend() {
    let table = RuleTable::dev_defaults().unwrap();

    for path in ["/websocket", "/websocket/room/1", "/websocket?token=abc"] {
        let rule = table.match_path(path).unwrap();
        assert_eq!(rule.target().as_str(), "ws://localhost:3002/");
        assert_eq!(rule.transport(), Transport::WebSocket);
        assert!(rule.changes_origin());
    }
}

#[test]
fn test_other_paths_fall_through() {
    let table = RuleTable::dev_defaults().unwrap();

    for path in [
        "/",
        "/index.html",
        "/src/main.tsx",
        "/@vite/client",
        "/docs/api",
        "/v1/api",
        "/health",
        "/ws",
    ] {
        assert!(table.match_path(path).is_none(), "{} should not be proxied", path);
    }
}

#[test]
fn test_first_matching_rule_wins() {
    let table = RuleTable::new(vec![
        ProxyRule::new("^/api/admin", "http://localhost:4000").unwrap(),
        ProxyRule::new("^/api", "http://localhost:3001").unwrap(),
    ]);

    assert_eq!(table.position("/api/admin/users"), Some(0));
    assert_eq!(table.position("/api/users"), Some(1));

    let reversed = RuleTable::new(table.into_rules().into_iter().rev().collect());
    assert_eq!(
        reversed.match_path("/api/admin/users").unwrap().target().port(),
        Some(3001)
    );
}

#[test]
fn test_rule_rejects_unsupported_targets() {
    assert!(ProxyRule::new("^/api", "https://localhost:3001").is_err());
    assert!(ProxyRule::new("^/api", "ftp://localhost").is_err());
    assert!(ProxyRule::new("^/api", "not a url").is_err());
    assert!(ProxyRule::new("^/(api", "http://localhost:3001").is_err());
}

#[test]
fn test_router_runs_configure_hook_per_rule() {
    let router = Router::new(RuleTable::dev_defaults().unwrap());

    assert_eq!(router.routes().len(), 2);
    for route in router.routes() {
        // stock listener replaced by the single filtering listener
        assert_eq!(route.handler().events().listener_count(), 1);
    }

    let plain = Router::new(RuleTable::new(vec![
        ProxyRule::new("^/api", "http://localhost:3001").unwrap(),
    ]));
    assert_eq!(plain.routes()[0].handler().events().listener_count(), 1);
}

#[test]
fn test_router_route_lookup() {
    let router = Router::new(RuleTable::dev_defaults().unwrap());

    assert_eq!(router.route("/api/x").unwrap().rule().target().port(), Some(3001));
    assert_eq!(router.route("/websocket").unwrap().rule().target().port(), Some(3002));
    assert!(router.route("/assets/logo.svg").is_none());
}

#[tokio::test]
async fn test_router_forward_claims_only_matching_paths() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let router = Router::new(RuleTable::new(vec![
        ProxyRule::new("^/api", &format!("http://127.0.0.1:{}", port)).unwrap(),
    ]));

    let unmatched = RequestBuilder::new()
        .method(Method::GET)
        .path("/src/main.tsx")
        .build()
        .unwrap();
    assert!(router.forward(&unmatched).await.is_none());

    let api = RequestBuilder::new()
        .method(Method::GET)
        .path("/api/users")
        .build()
        .unwrap();
    let response = router.forward(&api).await.unwrap();
    assert_eq!(response.status, StatusCode::BadGateway);
}
