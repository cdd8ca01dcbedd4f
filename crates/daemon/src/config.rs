// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Layered configuration: built-in defaults, `config.yaml` in `/run/config`
//! or the working directory, `WSD_`-prefixed environment variables, and
//! `--flag` overrides, in increasing precedence. Any field named
//! `<field>File` is read at startup and its content substituted for
//! `<field>`, matching the source's `loadSecret` convention.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use wsd_adapters::edge::kubernetes::KubernetesEdgeConfig;
use wsd_adapters::edge::redis::RedisEdgeConfig;
use wsd_adapters::hypervisor::http::HttpHypervisorConfig;
use wsd_core::WebspaceConfig;
use wsd_engine::{EngineConfig, PortsConfig};

#[derive(Parser, Debug, Default)]
#[command(name = "wsd", about = "webspace control-plane daemon")]
pub struct Cli {
    /// Path to a config.yaml file. Overrides the default search path.
    #[arg(long, env = "WSD_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Address the HTTP/WebSocket server binds to.
    #[arg(long, env = "WSD_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Overrides `logLevel` from the config file.
    #[arg(long, env = "WSD_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub cors_allowed_origins: Vec<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub base_url: String,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            base_url: "http://identity.internal".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LxdSection {
    pub base_url: String,
    pub tls_client_cert: Option<String>,
    pub tls_client_cert_file: Option<String>,
    pub tls_client_key: Option<String>,
    pub tls_client_key_file: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LxdSection {
    fn default() -> Self {
        Self {
            base_url: "https://127.0.0.1:8443".into(),
            tls_client_cert: None,
            tls_client_cert_file: None,
            tls_client_key: None,
            tls_client_key_file: None,
            request_timeout_secs: 30,
        }
    }
}

impl LxdSection {
    fn into_hypervisor_config(self) -> HttpHypervisorConfig {
        HttpHypervisorConfig {
            base_url: self.base_url,
            tls_client_cert: self.tls_client_cert,
            tls_client_key: self.tls_client_key,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisEdgeSection {
    pub addr: String,
    pub db: i64,
    pub https_entrypoint: String,
    pub cert_resolver: Option<String>,
    pub default_sans: Vec<String>,
    pub webspaced_url: Option<String>,
    pub iam_token: String,
    pub iam_token_file: Option<String>,
}

impl Default for RedisEdgeSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".into(),
            db: 0,
            https_entrypoint: "websecure".into(),
            cert_resolver: None,
            default_sans: Vec::new(),
            webspaced_url: None,
            iam_token: String::new(),
            iam_token_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesEdgeSection {
    pub namespace: String,
    pub https_entrypoint: String,
    pub default_secret: String,
    pub default_sans: Vec<String>,
    pub cluster_issuer: Option<String>,
    pub webspaced_url: Option<String>,
    pub iam_token: String,
    pub iam_token_file: Option<String>,
}

impl Default for KubernetesEdgeSection {
    fn default() -> Self {
        Self {
            namespace: "default".into(),
            https_entrypoint: "websecure".into(),
            default_secret: "webspace-default-tls".into(),
            default_sans: Vec::new(),
            cluster_issuer: None,
            webspaced_url: None,
            iam_token: String::new(),
            iam_token_file: None,
        }
    }
}

/// Selects which edge provider back-end `EdgeSection::provider` names.
/// An unrecognized tag is a fatal startup error (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeSection {
    pub provider: String,
    pub redis: RedisEdgeSection,
    pub kubernetes: KubernetesEdgeSection,
}

impl Default for EdgeSection {
    fn default() -> Self {
        Self {
            provider: "redis".into(),
            redis: RedisEdgeSection::default(),
            kubernetes: KubernetesEdgeSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsSection {
    pub start: u16,
    pub end: u16,
    pub max: usize,
    pub kubernetes_service: Option<String>,
}

impl Default for PortsSection {
    fn default() -> Self {
        Self {
            start: 49152,
            end: 65535,
            max: 16,
            kubernetes_service: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub instance_prefix: String,
    pub config_key: String,
    pub ip_timeout_secs: u64,
    pub instance_profile: String,
    pub ports: PortsSection,
    pub config_defaults: WebspaceConfig,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            instance_prefix: "ws-".into(),
            config_key: "user.webspace".into(),
            ip_timeout_secs: 120,
            instance_profile: "webspace".into(),
            ports: PortsSection::default(),
            config_defaults: WebspaceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub shutdown_grace_secs: u64,
    pub domain_base: String,
    pub http: HttpSection,
    pub identity: IdentitySection,
    pub lxd: LxdSection,
    pub edge: EdgeSection,
    pub engine: EngineSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8443".into(),
            log_level: "info".into(),
            log_dir: None,
            shutdown_grace_secs: 30,
            domain_base: "webspaces.example".into(),
            http: HttpSection::default(),
            identity: IdentitySection::default(),
            lxd: LxdSection::default(),
            edge: EdgeSection::default(),
            engine: EngineSection::default(),
        }
    }
}

/// The `config.yaml` search path: `/run/config/config.yaml`, then
/// `./config.yaml`.
fn default_config_path() -> Option<PathBuf> {
    for candidate in [Path::new("/run/config/config.yaml"), Path::new("config.yaml")] {
        if candidate.exists() {
            return Some(candidate.to_path_buf());
        }
    }
    None
}

/// Reads a `<field>File` path and returns its trimmed content, if set.
fn load_secret_file(path: &Option<String>) -> anyhow::Result<Option<String>> {
    match path {
        Some(p) if !p.is_empty() => Ok(Some(std::fs::read_to_string(p)?.trim().to_string())),
        _ => Ok(None),
    }
}

/// The `config.yaml` path actually in effect for `cli`, used both to load
/// and to watch for hot-reload. `None` means no file source was found —
/// defaults, environment, and CLI flags only.
pub fn config_path(cli: &Cli) -> Option<PathBuf> {
    cli.config_file.clone().or_else(default_config_path)
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let path = config_path(cli);

        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Config::default())
                .map_err(|e| anyhow::anyhow!("failed to seed config defaults: {e}"))?,
        );
        if let Some(path) = &path {
            builder = builder.add_source(config::File::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("WSD").separator("__"));

        let mut cfg: Config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("failed to parse configuration: {e}"))?;

        if let Some(bind_addr) = &cli.bind_addr {
            cfg.bind_addr = bind_addr.clone();
        }
        if let Some(log_level) = &cli.log_level {
            cfg.log_level = log_level.clone();
        }

        cfg.resolve_secrets()?;
        Ok(cfg)
    }

    fn resolve_secrets(&mut self) -> anyhow::Result<()> {
        if let Some(cert) = load_secret_file(&self.lxd.tls_client_cert_file)? {
            self.lxd.tls_client_cert = Some(cert);
        }
        if let Some(key) = load_secret_file(&self.lxd.tls_client_key_file)? {
            self.lxd.tls_client_key = Some(key);
        }
        if let Some(token) = load_secret_file(&self.edge.redis.iam_token_file)? {
            self.edge.redis.iam_token = token;
        }
        if let Some(token) = load_secret_file(&self.edge.kubernetes.iam_token_file)? {
            self.edge.kubernetes.iam_token = token;
        }
        Ok(())
    }

    pub fn hypervisor_config(&self) -> HttpHypervisorConfig {
        self.lxd.clone().into_hypervisor_config()
    }

    pub fn redis_edge_config(&self) -> RedisEdgeConfig {
        let r = &self.edge.redis;
        RedisEdgeConfig {
            addr: r.addr.clone(),
            db: r.db,
            https_entrypoint: r.https_entrypoint.clone(),
            cert_resolver: r.cert_resolver.clone(),
            default_sans: r.default_sans.clone(),
            domain_base: self.domain_base.clone(),
            webspaced_url: r.webspaced_url.clone(),
            iam_token: r.iam_token.clone(),
        }
    }

    pub fn kubernetes_edge_config(&self) -> KubernetesEdgeConfig {
        let k = &self.edge.kubernetes;
        KubernetesEdgeConfig {
            namespace: k.namespace.clone(),
            https_entrypoint: k.https_entrypoint.clone(),
            default_secret: k.default_secret.clone(),
            default_sans: k.default_sans.clone(),
            domain_base: self.domain_base.clone(),
            cluster_issuer: k.cluster_issuer.clone(),
            webspaced_url: k.webspaced_url.clone(),
            iam_token: k.iam_token.clone(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            instance_prefix: self.engine.instance_prefix.clone(),
            config_key: self.engine.config_key.clone(),
            domain_base: self.domain_base.clone(),
            ports: PortsConfig {
                start: self.engine.ports.start,
                end: self.engine.ports.end,
                max: self.engine.ports.max,
                kubernetes_service: self.engine.ports.kubernetes_service.clone(),
            },
            ip_timeout: Duration::from_secs(self.engine.ip_timeout_secs),
            instance_profile: self.engine.instance_profile.clone(),
            config_defaults: self.engine.config_defaults.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.edge.provider, "redis");
        assert!(cfg.engine.ports.start < cfg.engine.ports.end);
    }

    #[test]
    fn missing_secret_file_leaves_inline_value_untouched() {
        let mut cfg = Config::default();
        cfg.lxd.tls_client_cert = Some("inline-cert".into());
        cfg.resolve_secrets().unwrap();
        assert_eq!(cfg.lxd.tls_client_cert.as_deref(), Some("inline-cert"));
    }
}
