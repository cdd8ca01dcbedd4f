// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Back-end A: flat key/value store, populated via pipelined transactions.
//! The key layout below is load-bearing: it is the exact set `ClearConfig`
//! deletes and `GenerateConfig` (re)writes, ported key-for-key from the
//! source so existing Traefik deployments keep working unmodified.

use async_trait::async_trait;
use redis::AsyncCommands;

use super::{host_rule, host_sni_rule, EdgeProvider, GenerateRequest};

#[derive(Debug, Clone)]
pub struct RedisEdgeConfig {
    pub addr: String,
    pub db: i64,
    pub https_entrypoint: String,
    pub cert_resolver: Option<String>,
    pub default_sans: Vec<String>,
    pub domain_base: String,
    pub webspaced_url: Option<String>,
    pub iam_token: String,
}

pub struct RedisEdgeProvider {
    client: redis::Client,
    cfg: RedisEdgeConfig,
}

impl RedisEdgeProvider {
    pub fn new(cfg: RedisEdgeConfig) -> wsd_core::Result<Self> {
        let client = redis::Client::open(format!("redis://{}/{}", cfg.addr, cfg.db))
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
        Ok(Self { client, cfg })
    }

    async fn conn(&self) -> wsd_core::Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))
    }
}

fn clear_keys(n: &str, default_sans: &[String]) -> Vec<String> {
    let mut keys = vec![
        format!("traefik/http/services/{n}/loadbalancer/servers/0/url"),
        format!("traefik/http/services/{n}/loadbalancer/passhostheader"),
        format!("traefik/http/middlewares/{n}-boot/webspaceBoot/url"),
        format!("traefik/http/middlewares/{n}-boot/webspaceBoot/iamToken"),
        format!("traefik/http/middlewares/{n}-boot/webspaceBoot/userID"),
        format!("traefik/http/routers/{n}/middlewares/0"),
        format!("traefik/http/routers/{n}/service"),
        format!("traefik/http/routers/{n}/rule"),
        format!("traefik/http/routers/{n}/entrypoints/0"),
        format!("traefik/http/routers/{n}-https/service"),
        format!("traefik/http/routers/{n}-https/rule"),
        format!("traefik/http/routers/{n}-https/entrypoints/0"),
        format!("traefik/http/routers/{n}-https/middlewares/0"),
        format!("traefik/http/routers/{n}-https/tls"),
        format!("traefik/http/routers/{n}-https/tls/domains/0/main"),
        format!("traefik/http/routers/{n}-https/tls/certresolver"),
        format!("traefik/tcp/services/{n}/loadbalancer/servers/0/address"),
        format!("traefik/tcp/routers/{n}-https/service"),
        format!("traefik/tcp/routers/{n}-https/rule"),
        format!("traefik/tcp/routers/{n}-https/entrypoints/0"),
        format!("traefik/tcp/routers/{n}-https/tls"),
        format!("traefik/tcp/routers/{n}-https/tls/domains/0/main"),
        format!("traefik/tcp/routers/{n}-https/tls/certresolver"),
        format!("traefik/tcp/routers/{n}-https/tls/passthrough"),
        format!("traefik/tcp/routers/{n}-https/webspaceboot/url"),
        format!("traefik/tcp/routers/{n}-https/webspaceboot/iamToken"),
        format!("traefik/tcp/routers/{n}-https/webspaceboot/userID"),
    ];
    for (i, _) in default_sans.iter().enumerate() {
        keys.push(format!("traefik/http/routers/{n}-https/tls/domains/0/sans/{i}"));
        keys.push(format!("traefik/tcp/routers/{n}-https/tls/domains/0/sans/{i}"));
    }
    keys
}

#[async_trait]
impl EdgeProvider for RedisEdgeProvider {
    async fn clear_all(&self) -> wsd_core::Result<()> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg("traefik/*")
            .query_async(&mut conn)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
        if !keys.is_empty() {
            let _: () = conn
                .del(keys)
                .await
                .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
        }
        Ok(())
    }

    async fn clear_config(&self, instance_name: &str) -> wsd_core::Result<()> {
        let mut conn = self.conn().await?;
        let keys = clear_keys(instance_name, &self.cfg.default_sans);
        let _: () = conn
            .del(keys)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
        Ok(())
    }

    async fn generate_config(&self, req: GenerateRequest<'_>) -> wsd_core::Result<()> {
        if req.backend_addr.is_empty() && self.cfg.webspaced_url.is_none() {
            // P6: no backend and no boot hook configured is a no-op.
            return Ok(());
        }

        let n = req.instance_name;
        let rule = host_rule(req.domains);
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();

        if !req.backend_addr.is_empty() {
            pipe.set(
                format!("traefik/http/services/{n}/loadbalancer/servers/0/url"),
                format!("http://{}:{}", req.backend_addr, req.webspace.config.http_port),
            );
        } else {
            pipe.set(
                format!("traefik/http/services/{n}/loadbalancer/passhostheader"),
                true,
            );
            let webspaced_url = self.cfg.webspaced_url.clone().unwrap_or_default();
            pipe.set(
                format!("traefik/http/middlewares/{n}-boot/webspaceBoot/url"),
                webspaced_url,
            );
            pipe.set(
                format!("traefik/http/middlewares/{n}-boot/webspaceBoot/iamToken"),
                self.cfg.iam_token.clone(),
            );
            pipe.set(
                format!("traefik/http/middlewares/{n}-boot/webspaceBoot/userID"),
                req.webspace.user_id.to_string(),
            );
            pipe.set(format!("traefik/http/routers/{n}/middlewares/0"), format!("{n}-boot"));
        }

        pipe.set(format!("traefik/http/routers/{n}/service"), n);
        pipe.set(format!("traefik/http/routers/{n}/rule"), rule);
        pipe.set(
            format!("traefik/http/routers/{n}/entrypoints/0"),
            self.cfg.https_entrypoint.clone(),
        );

        let proto = if !req.webspace.config.sni_passthrough {
            pipe.set(format!("traefik/http/routers/{n}-https/service"), n);
            pipe.set(
                format!("traefik/http/routers/{n}-https/rule"),
                format!("Host(`{}.{}`)", req.username, self.cfg.domain_base),
            );
            if req.backend_addr.is_empty() {
                pipe.set(
                    format!("traefik/http/routers/{n}-https/middlewares/0"),
                    format!("{n}-boot"),
                );
            }
            "http"
        } else {
            if !req.backend_addr.is_empty() {
                pipe.set(
                    format!("traefik/tcp/services/{n}/loadbalancer/servers/0/address"),
                    format!("{}:{}", req.backend_addr, req.webspace.config.http_port),
                );
                pipe.set(format!("traefik/tcp/routers/{n}-https/service"), n);
            } else {
                let webspaced_url = self.cfg.webspaced_url.clone().unwrap_or_default();
                pipe.set(
                    format!("traefik/tcp/routers/{n}-https/webspaceboot/url"),
                    webspaced_url,
                );
                pipe.set(
                    format!("traefik/tcp/routers/{n}-https/webspaceboot/iamToken"),
                    self.cfg.iam_token.clone(),
                );
                pipe.set(
                    format!("traefik/tcp/routers/{n}-https/webspaceboot/userID"),
                    req.webspace.user_id.to_string(),
                );
            }
            pipe.set(
                format!("traefik/tcp/routers/{n}-https/rule"),
                host_sni_rule(req.domains),
            );
            pipe.set(format!("traefik/tcp/routers/{n}-https/tls/passthrough"), true);
            "tcp"
        };

        pipe.set(
            format!("traefik/{proto}/routers/{n}-https/entrypoints/0"),
            self.cfg.https_entrypoint.clone(),
        );
        pipe.set(format!("traefik/{proto}/routers/{n}-https/tls"), true);
        pipe.set(
            format!("traefik/{proto}/routers/{n}-https/tls/domains/0/main"),
            format!("*.{}", self.cfg.domain_base),
        );
        if let Some(resolver) = &self.cfg.cert_resolver {
            pipe.set(
                format!("traefik/{proto}/routers/{n}-https/tls/certresolver"),
                resolver.clone(),
            );
        }
        for (i, san) in self.cfg.default_sans.iter().enumerate() {
            pipe.set(
                format!("traefik/{proto}/routers/{n}-https/tls/domains/0/sans/{i}"),
                san.clone(),
            );
        }

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| wsd_core::Error::EdgeProvider(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_keys_include_default_sans() {
        let keys = clear_keys("ws-u7", &["extra.example".to_string()]);
        assert!(keys.contains(&"traefik/http/routers/ws-u7-https/tls/domains/0/sans/0".to_string()));
        assert!(keys.contains(&"traefik/tcp/routers/ws-u7-https/tls/domains/0/sans/0".to_string()));
    }

    #[test]
    fn clear_keys_cover_core_router_service_middleware_paths() {
        let keys = clear_keys("ws-u7", &[]);
        assert!(keys.contains(&"traefik/http/routers/ws-u7/service".to_string()));
        assert!(keys.contains(&"traefik/http/middlewares/ws-u7-boot/webspaceBoot/url".to_string()));
        assert!(keys.contains(&"traefik/tcp/routers/ws-u7-https/tls/passthrough".to_string()));
    }
}
