// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires the adapters and the reconciliation engine into a running HTTP
//! server. Per the hot-reload design note (§9), the whole thing — the
//! hypervisor client, manager, edge provider, forwarder, and HTTP listener
//! — is a single unit constructed fresh on every (re)start; nothing here
//! is reused across a config reload.

use std::sync::Arc;

use kube::Client as KubeClient;
use tracing::info;

use wsd_adapters::edge::kubernetes::KubernetesEdgeProvider;
use wsd_adapters::edge::redis::RedisEdgeProvider;
use wsd_adapters::edge::EdgeProvider;
use wsd_adapters::hypervisor::http::HttpHypervisor;
use wsd_adapters::hypervisor::Hypervisor;
use wsd_adapters::identity::{HttpIdentityService, IdentityService};
use wsd_engine::forwarder::PortForwarder;
use wsd_engine::Manager;

use crate::config::Config;
use crate::http;

pub struct Server {
    manager: Arc<Manager>,
    router: axum::Router,
}

impl Server {
    /// Builds every collaborator from `cfg` and runs the manager's initial
    /// sync. Fails fast (without binding a listener) if that sync or the
    /// edge provider tag is invalid, per the "unknown tag is a fatal
    /// startup error" design note.
    pub async fn build(cfg: &Config) -> anyhow::Result<Self> {
        let hypervisor: Arc<dyn Hypervisor> = Arc::new(HttpHypervisor::new(cfg.hypervisor_config())?);
        let identity: Arc<dyn IdentityService> = Arc::new(HttpIdentityService::new(cfg.identity.base_url.clone()));

        let edge: Arc<dyn EdgeProvider> = match cfg.edge.provider.as_str() {
            "redis" => Arc::new(RedisEdgeProvider::new(cfg.redis_edge_config())?),
            "kubernetes" => {
                let client = KubeClient::try_default()
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to build in-cluster Kubernetes client: {e}"))?;
                Arc::new(KubernetesEdgeProvider::new(client, cfg.kubernetes_edge_config()))
            }
            other => anyhow::bail!("unknown edge provider {other:?}; expected \"redis\" or \"kubernetes\""),
        };

        let forwarder = Arc::new(PortForwarder::new(None));
        let manager = Arc::new(Manager::new(hypervisor, edge, identity.clone(), forwarder, cfg.engine_config()));
        manager.start().await?;

        let router = http::router(manager.clone(), identity, cfg);
        Ok(Self { manager, router })
    }

    /// Binds `bind_addr` and serves until `shutdown` resolves, then drains
    /// the manager (stopping port forwards and clearing edge config).
    pub async fn serve(self, bind_addr: &str, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        info!(bind_addr, "webspace daemon listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("draining reconciliation manager");
        self.manager.shutdown().await;
        Ok(())
    }
}
