// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP port forwarding (§4.3). Each external port gets its own listener
//! task; a pre-connect hook resolves the backend address per connection,
//! which is what lets a forward lazily boot its webspace on first use
//! instead of requiring it to already be running.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};
use wsd_core::Webspace;

/// Resolves the backend address to dial for a forwarded connection. Called
/// once per accepted connection (not once per forward), so a lazy-boot
/// implementation can wait for the webspace to come up before the first
/// backend dial and then resolve instantly on every later connection.
#[async_trait]
pub trait PortHook: Send + Sync {
    async fn resolve(&self) -> wsd_core::Result<SocketAddr>;
}

/// A hook that always resolves to the same address — used when the
/// webspace is already known to be running at reconciliation time.
pub struct StaticHook(pub SocketAddr);

#[async_trait]
impl PortHook for StaticHook {
    async fn resolve(&self) -> wsd_core::Result<SocketAddr> {
        Ok(self.0)
    }
}

/// Mirrors forwarded ports onto a Kubernetes Service, for deployments where
/// the daemon runs behind a cluster-native load balancer. `None` (the
/// default `PortForwarder::new(None)`) disables mirroring entirely.
#[async_trait]
pub trait ServiceMirror: Send + Sync {
    async fn upsert_port(&self, external: u16) -> wsd_core::Result<()>;
    async fn remove_port(&self, external: u16) -> wsd_core::Result<()>;
}

struct ActiveForward {
    task: tokio::task::JoinHandle<()>,
}

/// Owns every active port forward. Lives for the daemon's lifetime;
/// `Trim`/`AddAll`/`Shutdown` are driven by the reconciliation manager
/// under the relevant per-user lock, so `forwards` itself only needs
/// interior mutability, not a higher-level lock.
pub struct PortForwarder {
    forwards: Mutex<HashMap<u16, ActiveForward>>,
    service_mirror: Option<Arc<dyn ServiceMirror>>,
}

impl PortForwarder {
    pub fn new(service_mirror: Option<Arc<dyn ServiceMirror>>) -> Self {
        Self {
            forwards: Mutex::new(HashMap::new()),
            service_mirror,
        }
    }

    /// Starts a new forward listening on `external`, proxying each
    /// accepted connection to whatever `hook` resolves.
    pub async fn add(&self, external: u16, hook: Arc<dyn PortHook>) -> wsd_core::Result<()> {
        if self.forwards.lock().contains_key(&external) {
            return Err(wsd_core::Error::Used);
        }

        let listener = TcpListener::bind(("0.0.0.0", external))
            .await
            .map_err(|e| wsd_core::Error::Internal(e.into()))?;

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((client, _)) => {
                        let hook = hook.clone();
                        tokio::spawn(async move { handle_client(client, hook, external).await });
                    }
                    Err(e) => {
                        info!(e_port = external, error = %e, "ending port forward");
                        return;
                    }
                }
            }
        });

        self.forwards.lock().insert(external, ActiveForward { task });

        if let Some(mirror) = &self.service_mirror {
            mirror.upsert_port(external).await?;
        }
        Ok(())
    }

    /// Stops and removes the forward on `external`. `update_service` is
    /// `false` when the caller is about to re-`add` the same port right
    /// after (e.g. refreshing a backend address) and doesn't want to
    /// trigger a spurious Service update in between.
    pub async fn remove(&self, external: u16, update_service: bool) -> wsd_core::Result<()> {
        let forward = self
            .forwards
            .lock()
            .remove(&external)
            .ok_or(wsd_core::Error::NotFound)?;
        forward.task.abort();

        if update_service {
            if let Some(mirror) = &self.service_mirror {
                mirror.remove_port(external).await?;
            }
        }
        Ok(())
    }

    /// Drops forwards whose external port no longer belongs to any
    /// webspace in `all`.
    pub async fn trim(&self, all: &[Webspace]) -> wsd_core::Result<()> {
        let mut seen = HashSet::new();
        for w in all {
            for &e in w.ports.keys() {
                if !seen.insert(e) {
                    return Err(wsd_core::Error::Internal(anyhow::anyhow!(
                        "more than one webspace uses external port {e}"
                    )));
                }
            }
        }

        let stale: Vec<u16> = self
            .forwards
            .lock()
            .keys()
            .copied()
            .filter(|e| !seen.contains(e))
            .collect();
        for e in stale {
            if let Err(err) = self.remove(e, true).await {
                warn!(e_port = e, error = %err, "failed to remove stale port forward");
            }
        }
        Ok(())
    }

    /// (Re)establishes every forward a webspace declares. `addr` is the
    /// webspace's current IP if running, `None` otherwise — when `None`,
    /// `lazy` is consulted on first connection instead of dialing
    /// immediately.
    pub async fn add_all(
        &self,
        w: &Webspace,
        addr: Option<&str>,
        lazy: Arc<dyn LazyBoot>,
    ) -> wsd_core::Result<()> {
        for (&external, &internal) in &w.ports {
            // An existing forward on this port belongs to us (uniqueness
            // across webspaces is enforced by `trim`/`AddPort`); refresh it
            // without touching the Service mirror.
            if self.forwards.lock().contains_key(&external) {
                self.remove(external, false).await?;
            }

            let hook: Arc<dyn PortHook> = match addr {
                Some(addr) => Arc::new(StaticHook(resolve_addr(addr, internal)?)),
                None => Arc::new(LazyHook {
                    internal,
                    lazy: lazy.clone(),
                }),
            };
            self.add(external, hook).await?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        let ports: Vec<u16> = self.forwards.lock().keys().copied().collect();
        for e in ports {
            if let Err(err) = self.remove(e, true).await {
                warn!(e_port = e, error = %err, "failed to remove port forward on shutdown");
            }
        }
    }
}

/// Boots the webspace on demand and returns its IP address once reachable.
/// Implemented by `wsd-engine::webspace::Entities` so the forwarder never
/// needs to know about the hypervisor directly.
#[async_trait]
pub trait LazyBoot: Send + Sync {
    async fn ensure_started(&self) -> wsd_core::Result<String>;
}

struct LazyHook {
    internal: u16,
    lazy: Arc<dyn LazyBoot>,
}

#[async_trait]
impl PortHook for LazyHook {
    async fn resolve(&self) -> wsd_core::Result<SocketAddr> {
        trace!("waiting for webspace to start to forward port");
        let ip = self.lazy.ensure_started().await?;
        resolve_addr(&ip, self.internal)
    }
}

fn resolve_addr(host: &str, port: u16) -> wsd_core::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    format!("{host}:{port}")
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .ok_or_else(|| wsd_core::Error::Internal(anyhow::anyhow!("invalid backend address {host}:{port}")))
}

async fn handle_client(mut client: TcpStream, hook: Arc<dyn PortHook>, e_port: u16) {
    let backend_addr = match hook.resolve().await {
        Ok(a) => a,
        Err(err) => {
            warn!(e_port, error = %err, "port forward hook execution failed");
            return;
        }
    };

    let mut backend = match TcpStream::connect(backend_addr).await {
        Ok(b) => b,
        Err(err) => {
            warn!(e_port, backend = %backend_addr, error = %err, "port forward backend connection failed");
            return;
        }
    };

    let (mut cr, mut cw) = client.split();
    let (mut br, mut bw) = backend.split();
    let client_to_backend = async {
        let _ = tokio::io::copy(&mut cr, &mut bw).await;
        let _ = bw.shutdown().await;
    };
    let backend_to_client = async {
        let _ = tokio::io::copy(&mut br, &mut cw).await;
        let _ = cw.shutdown().await;
    };
    tokio::join!(client_to_backend, backend_to_client);
    debug!(e_port, backend = %backend_addr, "forwarded connection ended normally");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn webspace_with_ports(uid: u64, ports: &[u16]) -> Webspace {
        let mut w = Webspace::new(uid);
        w.ports = ports.iter().map(|&p| (p, 80)).collect::<HashMap<_, _>>();
        w
    }

    #[tokio::test]
    async fn trim_rejects_duplicate_external_ports_across_webspaces() {
        let fwd = PortForwarder::new(None);
        let all = vec![webspace_with_ports(1, &[8080]), webspace_with_ports(2, &[8080])];
        assert!(fwd.trim(&all).await.is_err());
    }

    #[tokio::test]
    async fn add_rejects_reusing_a_bound_port() {
        let fwd = PortForwarder::new(None);
        fwd.add(0, Arc::new(StaticHook("127.0.0.1:1".parse().unwrap())))
            .await
            .unwrap();
        let err = fwd
            .add(0, Arc::new(StaticHook("127.0.0.1:1".parse().unwrap())))
            .await;
        assert!(matches!(err, Err(wsd_core::Error::Used)));
        fwd.shutdown().await;
    }
}
