//! Dev server configuration
//!
//! Built once at start-up from environment state, optionally on top of a
//! YAML file, and never mutated afterwards.

use crate::proxy::events::configure_proxy;
use crate::proxy::rule::{
    ProxyRule, RuleError, RuleTable, API_PATTERN, API_TARGET, WEBSOCKET_PATTERN, WEBSOCKET_TARGET,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEV_SERVER_PORT: u16 = 3000;

/// Compile-time constant carrying the commit id.
pub const GIT_COMMIT_DEFINE: &str = "process.env.GIT_COMMIT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid proxy rule: {0}")]
    Rule(#[from] RuleError),

    #[error("invalid watch pattern {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory relative alias replacements resolve against
    pub root: PathBuf,
    pub server: ServerConfig,
    pub proxy: Vec<ProxyRuleConfig>,
    pub watch: WatchConfig,
    pub resolve: ResolveConfig,
    pub build: BuildConfig,
    pub define: DefineConfig,
}

/// `host: true` listens everywhere, a string names the interface,
/// absent or `false` means localhost.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HostSetting {
    Flag(bool),
    Name(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Option<HostSetting>,
    pub port: u16,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRuleConfig {
    pub pattern: String,
    pub target: String,
    #[serde(default)]
    pub change_origin: bool,
    /// Install the startup-race filtering error listener.
    #[serde(default = "default_true")]
    pub suppress_startup_errors: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    pub alias: Vec<AliasConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AliasConfig {
    pub find: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub out_dir: PathBuf,
    pub assets_dir: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DefineConfig {
    pub git_commit: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            server: ServerConfig::default(),
            proxy: vec![
                ProxyRuleConfig {
                    pattern: API_PATTERN.to_string(),
                    target: API_TARGET.to_string(),
                    change_origin: true,
                    suppress_startup_errors: true,
                },
                ProxyRuleConfig {
                    pattern: WEBSOCKET_PATTERN.to_string(),
                    target: WEBSOCKET_TARGET.to_string(),
                    change_origin: true,
                    suppress_startup_errors: true,
                },
            ],
            watch: WatchConfig::default(),
            resolve: ResolveConfig::default(),
            build: BuildConfig::default(),
            define: DefineConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEV_SERVER_PORT,
            connect_timeout_ms: None,
            request_timeout_ms: None,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        // backend sources and entry files should not trigger a client reload
        Self {
            ignored: vec![
                "**/src/server/**/*.ts".to_string(),
                "**/env.ts".to_string(),
                "**/entry.ts".to_string(),
            ],
        }
    }
}

impl Default for ResolveConfig {
    fn default() -> Self {
        let alias = |find: &str, replacement: &str| AliasConfig {
            find: find.to_string(),
            replacement: replacement.to_string(),
        };
        Self {
            alias: vec![
                alias("node-fetch", "cross-fetch"),
                alias("~", "./src"),
                alias("src", "./src"),
                alias("env", "./env"),
            ],
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("dist/client"),
            assets_dir: "app-assets".to_string(),
        }
    }
}

impl Config {
    /// Load from the process environment.
    ///
    /// `DEVGATE_CONFIG` names an optional YAML file; `VITE_HOST` and
    /// `GIT_COMMIT` are applied on top.
    pub fn load() -> Result<Self, ConfigError> {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_lookup(root, |key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; `root` is used unless a
    /// config file is named, in which case its directory is.
    pub fn from_lookup<F>(root: PathBuf, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("DEVGATE_CONFIG").filter(|p| !p.is_empty()) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self {
                root,
                ..Self::default()
            },
        };

        if let Some(host) = host_from_env(lookup("VITE_HOST")) {
            config.server.host = Some(host);
        }

        if let Some(commit) = lookup("GIT_COMMIT") {
            config.define.git_commit = Some(commit);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_yaml_str(&text)?;
        if config.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.root = base.join(&config.root);
        }
        Ok(config)
    }

    /// Parse YAML; omitted sections keep their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rule_table()?;
        self.watch.compiled()?;
        Ok(())
    }

    /// Compile the proxy section into an ordered rule table.
    pub fn rule_table(&self) -> Result<RuleTable, ConfigError> {
        let rules = self
            .proxy
            .iter()
            .map(|rule| {
                let compiled = ProxyRule::new(&rule.pattern, &rule.target)?
                    .change_origin(rule.change_origin);
                Ok(if rule.suppress_startup_errors {
                    compiled.configure(configure_proxy)
                } else {
                    compiled
                })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;

        Ok(RuleTable::new(rules))
    }

    /// Resolve an import specifier through the alias table.
    ///
    /// Relative replacements are anchored at `root`.
    pub fn resolve_alias(&self, specifier: &str) -> Option<String> {
        let (alias, rest) = self.resolve.lookup(specifier)?;

        let replacement = match alias.replacement.strip_prefix("./") {
            Some(relative) => self.root.join(relative).to_string_lossy().into_owned(),
            None if alias.replacement.starts_with("../") => {
                self.root.join(&alias.replacement).to_string_lossy().into_owned()
            }
            None => alias.replacement.clone(),
        };

        Some(format!("{}{}", replacement, rest))
    }

    /// Compile-time constants as `(name, source literal)` pairs.
    pub fn defines(&self) -> Vec<(String, String)> {
        let commit = match &self.define.git_commit {
            Some(commit) => serde_json::Value::String(commit.clone()).to_string(),
            None => "undefined".to_string(),
        };
        vec![(GIT_COMMIT_DEFINE.to_string(), commit)]
    }
}

fn host_from_env(value: Option<String>) -> Option<HostSetting> {
    match value {
        Some(v) if v == "true" => Some(HostSetting::Flag(true)),
        Some(v) if !v.is_empty() => Some(HostSetting::Name(v)),
        _ => None,
    }
}

impl ServerConfig {
    pub fn bind_host(&self) -> &str {
        match &self.host {
            Some(HostSetting::Flag(true)) => "0.0.0.0",
            Some(HostSetting::Name(name)) => name,
            Some(HostSetting::Flag(false)) | None => "localhost",
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host(), self.port)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

impl WatchConfig {
    fn compiled(&self) -> Result<Vec<glob::Pattern>, ConfigError> {
        self.ignored
            .iter()
            .map(|pattern| {
                glob::Pattern::new(pattern).map_err(|source| ConfigError::InvalidGlob {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Whether a change to `path` should be kept from the reload watcher.
    pub fn is_ignored(&self, path: &str) -> bool {
        match self.compiled() {
            Ok(patterns) => patterns.iter().any(|p| p.matches(path)),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring invalid watch patterns");
                false
            }
        }
    }
}

impl ResolveConfig {
    /// First alias whose `find` is the specifier or a `/`-delimited prefix
    /// of it, with the unmatched remainder.
    pub fn lookup<'a, 's>(&'a self, specifier: &'s str) -> Option<(&'a AliasConfig, &'s str)> {
        self.alias.iter().find_map(|alias| {
            let rest = specifier.strip_prefix(alias.find.as_str())?;
            (rest.is_empty() || rest.starts_with('/')).then_some((alias, rest))
        })
    }
}

impl BuildConfig {
    /// Where hashed assets land.
    pub fn assets_path(&self) -> PathBuf {
        self.out_dir.join(&self.assets_dir)
    }
}
