use devgate::config::{Config, HostSetting, DEV_SERVER_PORT};
use std::collections::HashMap;
use std::path::PathBuf;

fn config_with(vars: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(PathBuf::from("/app"), |key| vars.get(key).cloned()).unwrap()
}

#[test]
fn test_config_default_address() {
    let cfg = config_with(&[]);
    assert_eq!(cfg.server.port, DEV_SERVER_PORT);
    assert_eq!(cfg.server.bind_addr(), "localhost:3000");
}

#[test]
fn test_config_host_true_binds_all_interfaces() {
    let cfg = config_with(&[("VITE_HOST", "true")]);
    assert_eq!(cfg.server.host, Some(HostSetting::Flag(true)));
    assert_eq!(cfg.server.bind_addr(), "0.0.0.0:3000");
}

#[test]
fn test_config_host_named_interface() {
    let cfg = config_with(&[("VITE_HOST", "192.168.1.20")]);
    assert_eq!(cfg.server.bind_addr(), "192.168.1.20:3000");
}

#[test]
fn test_config_empty_host_falls_back_to_localhost() {
    let cfg = config_with(&[("VITE_HOST", "")]);
    assert_eq!(cfg.server.host, None);
    assert_eq!(cfg.server.bind_host(), "localhost");
}

#[test]
fn test_config_git_commit_define() {
    let cfg = config_with(&[("GIT_COMMIT", "3f9c2ab")]);
    assert_eq!(
        cfg.defines(),
        vec![("process.env.GIT_COMMIT".to_string(), "\"3f9c2ab\"".to_string())]
    );

    let cfg = config_with(&[]);
    assert_eq!(cfg.defines()[0].1, "undefined");
}

#[test]
fn test_config_default_rule_table() {
    let cfg = config_with(&[]);
    let table = cfg.rule_table().unwrap();
    let rules: Vec<_> = table.iter().collect();

    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].pattern(), "^/(api|health-check).*");
    assert_eq!(rules[0].target().as_str(), "http://localhost:3001/");
    assert!(rules[0].changes_origin());
    assert!(rules[0].configure_hook().is_some());
    assert_eq!(rules[1].pattern(), "^/websocket");
    assert_eq!(rules[1].target().as_str(), "ws://localhost:3002/");
    assert!(rules[1].changes_origin());
}

#[test]
fn test_config_watch_ignores_backend_sources() {
    let cfg = config_with(&[]);

    assert!(cfg.watch.is_ignored("app/src/server/routes/users.ts"));
    assert!(cfg.watch.is_ignored("app/env.ts"));
    assert!(cfg.watch.is_ignored("app/entry.ts"));
    assert!(!cfg.watch.is_ignored("app/src/client/main.tsx"));
    assert!(!cfg.watch.is_ignored("app/src/components/Button.ts"));
}

#[test]
fn test_config_alias_resolution() {
    let cfg = config_with(&[]);

    assert_eq!(cfg.resolve_alias("node-fetch").as_deref(), Some("cross-fetch"));
    assert_eq!(
        cfg.resolve_alias("~/components/Button").as_deref(),
        Some("/app/src/components/Button")
    );
    assert_eq!(cfg.resolve_alias("src/hooks").as_deref(), Some("/app/src/hooks"));
    assert_eq!(cfg.resolve_alias("env").as_deref(), Some("/app/env"));
    assert_eq!(cfg.resolve_alias("environment"), None);
    assert_eq!(cfg.resolve_alias("react"), None);
}

#[test]
fn test_config_build_layout() {
    let cfg = config_with(&[]);
    assert_eq!(cfg.build.out_dir, PathBuf::from("dist/client"));
    assert_eq!(cfg.build.assets_path(), PathBuf::from("dist/client/app-assets"));
}

#[test]
fn test_config_yaml_overrides_proxy_rules() {
    let yaml = r#"
server:
  host: true
  request_timeout_ms: 2500
proxy:
  - pattern: "^/graphql"
    target: "http://127.0.0.1:4000"
    change_origin: true
"#;
    let cfg = Config::from_yaml_str(yaml).unwrap();

    assert_eq!(cfg.server.bind_addr(), "0.0.0.0:3000");
    assert_eq!(cfg.server.request_timeout().unwrap().as_millis(), 2500);
    assert_eq!(cfg.server.connect_timeout(), None);

    let table = cfg.rule_table().unwrap();
    assert_eq!(table.len(), 1);
    let rule = table.match_path("/graphql").unwrap();
    assert!(rule.configure_hook().is_some());

    // untouched sections keep their defaults
    assert_eq!(cfg.build.assets_dir, "app-assets");
    assert_eq!(cfg.resolve.alias.len(), 4);
}

#[test]
fn test_config_rejects_tls_targets() {
    let yaml = r#"
proxy:
  - pattern: "^/api"
    target: "https://localhost:3001"
"#;
    assert!(Config::from_yaml_str(yaml).is_err());
}

#[test]
fn test_config_rejects_bad_pattern() {
    let yaml = r#"
proxy:
  - pattern: "^/(api"
    target: "http://localhost:3001"
"#;
    assert!(Config::from_yaml_str(yaml).is_err());
}

#[test]
fn test_config_clone() {
    let cfg1 = config_with(&[("VITE_HOST", "true")]);
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.server.bind_addr(), cfg2.server.bind_addr());
}
