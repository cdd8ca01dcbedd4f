// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciliation manager (§4.1): owns the per-user lock map, drives
//! the hypervisor lifecycle-event listener with reconnect backoff, and
//! keeps the edge configuration and port forwards converged with what the
//! hypervisor actually reports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use wsd_adapters::edge::{EdgeProvider, GenerateRequest};
use wsd_adapters::hypervisor::{ExecOutcome, Hypervisor, InstanceState, InstanceStatus, InteractiveSession};
use wsd_adapters::identity::IdentityService;
use wsd_core::naming::{parse_source_uid, LifecycleAction};
use wsd_core::{Error, Image, LifecycleEvent, Result, TimestampDedup, Webspace, WebspaceConfig};

use crate::config::EngineConfig;
use crate::forwarder::{LazyBoot, PortForwarder};
use crate::webspace::Entities;

/// A per-user-locked handle the forwarder's lazy hook uses to boot a
/// webspace on first connection.
struct UidLazyBoot {
    entities: Arc<Entities>,
    uid: u64,
}

#[async_trait]
impl LazyBoot for UidLazyBoot {
    async fn ensure_started(&self) -> Result<String> {
        self.entities.ensure_started(self.uid).await
    }
}

pub struct Manager {
    hypervisor: Arc<dyn Hypervisor>,
    edge: Arc<dyn EdgeProvider>,
    identity: Arc<dyn IdentityService>,
    entities: Arc<Entities>,
    forwarder: Arc<PortForwarder>,
    config: EngineConfig,

    locks: RwLock<HashMap<u64, Arc<AsyncMutex<()>>>>,
    healthy: AtomicBool,
    dedup: SyncMutex<TimestampDedup>,
}

impl Manager {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        edge: Arc<dyn EdgeProvider>,
        identity: Arc<dyn IdentityService>,
        forwarder: Arc<PortForwarder>,
        config: EngineConfig,
    ) -> Self {
        let entities = Arc::new(Entities::new(hypervisor.clone(), config.clone()));
        Self {
            hypervisor,
            edge,
            identity,
            entities,
            forwarder,
            config,
            locks: RwLock::new(HashMap::new()),
            healthy: AtomicBool::new(false),
            dedup: SyncMutex::new(TimestampDedup::new()),
        }
    }

    /// Acquires the per-user mutex, lazily creating it on first use. Never
    /// pruned, matching the source's `sync.Map` (a user's lock lives for
    /// the daemon's lifetime once touched).
    async fn lock(&self, uid: u64) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = {
            let existing = self.locks.read().get(&uid).cloned();
            match existing {
                Some(m) => m,
                None => self.locks.write().entry(uid).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone(),
            }
        };
        mutex.lock_owned().await
    }

    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub async fn images(&self) -> Result<Vec<Image>> {
        self.hypervisor.list_images().await
    }

    pub async fn get(&self, uid: u64, user_hint: Option<u64>) -> Result<Webspace> {
        self.entities.get(uid, user_hint).await
    }

    pub async fn get_all(&self) -> Result<Vec<Webspace>> {
        Ok(self.entities.get_all().await?.into_iter().map(|(_, w)| w).collect())
    }

    /// Resolves the username and full domain list a `GenerateConfig` call
    /// needs for a given webspace.
    async fn generate_request_context(&self, w: &Webspace) -> Result<(String, Vec<String>)> {
        let user = self.identity.get_by_id(w.user_id).await?;
        let default_domain = wsd_core::naming::default_domain(&user.username, &self.config.domain_base);
        Ok((user.username, w.all_domains(&default_domain)))
    }

    async fn reconcile_one(&self, name: &str, w: &Webspace) -> Result<()> {
        let state = self.hypervisor.state(name).await?;
        let running = state.status == InstanceStatus::Running;

        let addr = if running {
            Some(self.entities.await_ip(w.user_id).await?)
        } else {
            None
        };

        let (username, domains) = self.generate_request_context(w).await?;
        self.edge
            .generate_config(GenerateRequest {
                instance_name: name,
                username: &username,
                domains: &domains,
                webspace: w,
                backend_addr: addr.as_deref().unwrap_or(""),
            })
            .await?;

        let lazy = Arc::new(UidLazyBoot {
            entities: self.entities.clone(),
            uid: w.user_id,
        });
        self.forwarder.add_all(w, addr.as_deref(), lazy).await?;
        Ok(())
    }

    /// Clears every existing edge config, re-reads every webspace from the
    /// hypervisor, trims stale port forwards, and regenerates from
    /// scratch. Per-webspace failures are logged and skipped; they don't
    /// fail the overall sync (the next reconnect or event retries).
    pub async fn sync_all(&self) -> Result<()> {
        debug!("clearing all existing edge configs");
        self.edge.clear_all().await?;

        let all = self.entities.get_all().await?;
        let webspaces: Vec<Webspace> = all.iter().map(|(_, w)| w.clone()).collect();
        self.forwarder.trim(&webspaces).await?;

        for (name, w) in &all {
            if let Err(err) = self.reconcile_one(name, w).await {
                error!(uid = w.user_id, error = %err, "failed to sync webspace");
            }
        }
        Ok(())
    }

    /// Runs the initial full sync, then spawns the lifecycle-event
    /// consumer with reconnect backoff. Returns once the initial sync and
    /// first subscribe succeed; the ongoing reconnect loop runs in the
    /// background for the manager's lifetime.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.sync_all().await?;
        let rx = self.hypervisor.subscribe_events().await?;
        self.healthy.store(true, Ordering::Relaxed);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.event_loop(rx).await });
        Ok(())
    }

    async fn event_loop(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<LifecycleEvent>) {
        loop {
            while let Some(event) = rx.recv().await {
                self.on_event(event).await;
            }

            // The stream ended: the hypervisor connection dropped.
            self.healthy.store(false, Ordering::Relaxed);
            warn!("lifecycle event stream ended, reconnecting");

            let mut backoff = ExponentialBackoff {
                max_elapsed_time: None,
                ..ExponentialBackoff::default()
            };
            rx = loop {
                match self.hypervisor.subscribe_events().await {
                    Ok(rx) => break rx,
                    Err(err) => {
                        let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                        warn!(error = %err, ?delay, "lifecycle listener reconnect failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            };
            info!("lifecycle listener reconnect succeeded");

            let mut backoff = ExponentialBackoff {
                max_elapsed_time: None,
                ..ExponentialBackoff::default()
            };
            loop {
                let attempt = tokio::time::timeout(Duration::from_secs(30), self.sync_all()).await;
                match attempt {
                    Ok(Ok(())) => break,
                    Ok(Err(err)) => {
                        let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                        warn!(error = %err, ?delay, "post-reconnect sync failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(_) => {
                        let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                        warn!(?delay, "post-reconnect sync timed out, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            self.healthy.store(true, Ordering::Relaxed);
        }
    }

    /// Reconciles a single lifecycle event. Failures are logged and
    /// swallowed — the design deliberately does not retry a single event;
    /// the next event (or the next full sync) re-converges.
    async fn on_event(&self, event: LifecycleEvent) {
        if self.dedup.lock().is_duplicate(&event) {
            debug!("duplicate lifecycle event detected, ignoring");
            return;
        }

        let Some(uid) = parse_source_uid(&self.config.instance_prefix, &event.metadata.source) else {
            return;
        };

        let _guard = self.lock(uid).await;
        let name = wsd_core::naming::instance_name(&self.config.instance_prefix, uid);

        if let Err(err) = self.edge.clear_config(&name).await {
            error!(uid, error = %err, "failed to clear edge config");
            return;
        }

        let all = match self.entities.get_all().await {
            Ok(all) => all,
            Err(err) => {
                error!(uid, error = %err, "failed to list webspaces during event handling");
                return;
            }
        };
        let webspaces: Vec<Webspace> = all.iter().map(|(_, w)| w.clone()).collect();
        if let Err(err) = self.forwarder.trim(&webspaces).await {
            error!(uid, error = %err, "failed to trim port forwards during event handling");
            return;
        }

        let Some(action) = LifecycleAction::parse(&event.metadata.action) else {
            return;
        };
        if action == LifecycleAction::Deleted {
            return;
        }

        let w = match self.entities.get(uid, None).await {
            Ok(w) => w,
            Err(err) => {
                error!(uid, error = %err, "failed to load webspace during event handling");
                return;
            }
        };

        let running = match action.implied_running() {
            Some(running) => running,
            None => match self.hypervisor.state(&name).await {
                Ok(state) => state.status == InstanceStatus::Running,
                Err(err) => {
                    error!(uid, error = %err, "failed to get hypervisor state during event handling");
                    return;
                }
            },
        };

        let addr = if running {
            match self.entities.await_ip(uid).await {
                Ok(ip) => Some(ip),
                Err(err) => {
                    error!(uid, error = %err, "failed to resolve webspace IP during event handling");
                    return;
                }
            }
        } else {
            None
        };

        let (username, domains) = match self.generate_request_context(&w).await {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(uid, error = %err, "failed to resolve identity during event handling");
                return;
            }
        };
        if let Err(err) = self
            .edge
            .generate_config(GenerateRequest {
                instance_name: &name,
                username: &username,
                domains: &domains,
                webspace: &w,
                backend_addr: addr.as_deref().unwrap_or(""),
            })
            .await
        {
            error!(uid, error = %err, "failed to generate edge config during event handling");
            return;
        }

        let lazy = Arc::new(UidLazyBoot {
            entities: self.entities.clone(),
            uid,
        });
        if let Err(err) = self.forwarder.add_all(&w, addr.as_deref(), lazy).await {
            error!(uid, error = %err, "failed to add port forwards during event handling");
        }
    }

    pub async fn shutdown(&self) {
        self.forwarder.shutdown().await;
        if let Err(err) = self.edge.clear_all().await {
            warn!(error = %err, "failed to clear edge config on shutdown");
        }
    }

    // --- Entity operations requiring the per-user lock ------------------

    pub async fn create(
        &self,
        uid: u64,
        image: &str,
        password: Option<&str>,
        ssh_key: Option<&str>,
    ) -> Result<Webspace> {
        let _guard = self.lock(uid).await;
        self.entities.create(uid, image, password, ssh_key).await
    }

    pub async fn delete(&self, uid: u64) -> Result<()> {
        let _guard = self.lock(uid).await;
        self.entities.delete(uid).await
    }

    pub async fn boot(&self, uid: u64) -> Result<()> {
        self.entities.boot(uid).await
    }

    pub async fn reboot(&self, uid: u64) -> Result<()> {
        self.entities.reboot(uid).await
    }

    pub async fn shutdown_webspace(&self, uid: u64) -> Result<()> {
        self.entities.shutdown(uid).await
    }

    /// Forces reconciliation for a single webspace outside the normal
    /// event flow — used by the `POST /webspaces/{uid}/sync` endpoint.
    pub async fn sync(&self, uid: u64) -> Result<()> {
        let _guard = self.lock(uid).await;
        let name = wsd_core::naming::instance_name(&self.config.instance_prefix, uid);
        let w = self.entities.get(uid, None).await?;
        let addr = self.entities.get_ip(uid).await.ok();

        self.edge.clear_config(&name).await?;
        let (username, domains) = self.generate_request_context(&w).await?;
        self.edge
            .generate_config(GenerateRequest {
                instance_name: &name,
                username: &username,
                domains: &domains,
                webspace: &w,
                backend_addr: addr.as_deref().unwrap_or(""),
            })
            .await?;

        let lazy = Arc::new(UidLazyBoot {
            entities: self.entities.clone(),
            uid,
        });
        self.forwarder.add_all(&w, addr.as_deref(), lazy).await
    }

    pub async fn add_domain(&self, uid: u64, domain: &str) -> Result<()> {
        let _guard = self.lock(uid).await;
        let user = self.identity.get_by_id(uid).await?;
        let default_domain = wsd_core::naming::default_domain(&user.username, &self.config.domain_base);

        verify_domain_txt_record(domain, uid).await?;

        let all = self.entities.get_all().await?;
        if all.iter().any(|(_, w)| w.domains.iter().any(|d| d == domain)) {
            return Err(Error::Used);
        }

        let mut w = self.entities.get(uid, None).await?;
        w.add_domain(domain, &default_domain)?;
        self.entities.save(uid, &w).await
    }

    pub async fn remove_domain(&self, uid: u64, domain: &str) -> Result<()> {
        let _guard = self.lock(uid).await;
        let user = self.identity.get_by_id(uid).await?;
        let default_domain = wsd_core::naming::default_domain(&user.username, &self.config.domain_base);

        let mut w = self.entities.get(uid, None).await?;
        w.remove_domain(domain, &default_domain)?;
        self.entities.save(uid, &w).await
    }

    pub async fn add_port(&self, uid: u64, external: u16, internal: u16) -> Result<u16> {
        let _guard = self.lock(uid).await;
        if internal == 0 {
            return Err(Error::BadPort);
        }
        if external != 0 && (external < self.config.ports.start || external > self.config.ports.end) {
            return Err(Error::BadPort);
        }

        let all = self.entities.get_all().await?;
        let mut used: Vec<u16> = Vec::new();
        for (_, w) in &all {
            for &e in w.ports.keys() {
                if e == external && external != 0 {
                    return Err(Error::Used);
                }
                if external == 0 {
                    used.push(e);
                }
            }
        }

        let chosen = if external == 0 {
            pick_free_port(self.config.ports.start, self.config.ports.end, &used)?
        } else {
            external
        };

        let mut w = self.entities.get(uid, None).await?;
        w.add_port(chosen, internal, self.config.ports.max)?;
        self.entities.save(uid, &w).await?;
        Ok(chosen)
    }

    pub async fn remove_port(&self, uid: u64, external: u16) -> Result<()> {
        let _guard = self.lock(uid).await;
        let mut w = self.entities.get(uid, None).await?;
        w.remove_port(external)?;
        self.entities.save(uid, &w).await
    }

    pub fn instance_name(&self, uid: u64) -> String {
        self.entities.instance_name(uid)
    }

    /// State() (§4.4): a hypervisor state snapshot. Read-only, no per-user
    /// lock.
    pub async fn state(&self, uid: u64) -> Result<InstanceState> {
        self.hypervisor.state(&self.instance_name(uid)).await
    }

    /// GetDomains(ctx) (§4.4): the stored custom domains with the
    /// synthesized default domain prepended.
    pub async fn domains(&self, uid: u64) -> Result<Vec<String>> {
        let w = self.entities.get(uid, None).await?;
        let (_, domains) = self.generate_request_context(&w).await?;
        Ok(domains)
    }

    pub async fn config(&self, uid: u64) -> Result<WebspaceConfig> {
        Ok(self.entities.get(uid, None).await?.config)
    }

    /// PATCH .../config: applies whichever fields `patch` sets and returns
    /// the configuration as it stood *before* the update.
    pub async fn patch_config(&self, uid: u64, patch: &wsd_wire::PatchConfigRequest) -> Result<WebspaceConfig> {
        let _guard = self.lock(uid).await;
        let mut w = self.entities.get(uid, None).await?;
        let previous = w.config.clone();
        if let Some(v) = patch.startup_delay {
            w.config.startup_delay = v;
        }
        if let Some(v) = patch.http_port {
            w.config.http_port = v;
        }
        if let Some(v) = patch.sni_passthrough {
            w.config.sni_passthrough = v;
        }
        w.config.validate()?;
        self.entities.save(uid, &w).await?;
        Ok(previous)
    }

    pub async fn log(&self, uid: u64) -> Result<String> {
        self.hypervisor.console_log(&self.instance_name(uid)).await
    }

    pub async fn clear_log(&self, uid: u64) -> Result<()> {
        self.hypervisor.clear_console_log(&self.instance_name(uid)).await
    }

    /// Non-interactive exec (§4.5). `ensure_booted` boots the instance
    /// first if it's stopped.
    pub async fn exec(&self, uid: u64, command: &str, ensure_booted: bool) -> Result<ExecOutcome> {
        let name = self.instance_name(uid);
        crate::exec::exec(
            self.hypervisor.as_ref(),
            crate::exec::ExecRequest {
                instance_name: &name,
                command,
                ensure_booted,
            },
        )
        .await
    }

    /// Interactive console bridge (§4.6): attaches to `/dev/console`,
    /// booting the instance first if it isn't already running.
    pub async fn attach_console(&self, uid: u64, width: u16, height: u16) -> Result<Box<dyn InteractiveSession>> {
        self.hypervisor.attach_console(&self.instance_name(uid), width, height).await
    }

    /// Interactive exec bridge (§4.6): runs `command` with a PTY attached.
    pub async fn attach_exec(
        &self,
        uid: u64,
        command: &str,
        width: u16,
        height: u16,
    ) -> Result<Box<dyn InteractiveSession>> {
        self.hypervisor
            .attach_exec(&self.instance_name(uid), command, width, height)
            .await
    }

    /// Used by the `POST /internal/{username}/ensure-started` boot hook.
    pub async fn ensure_started(&self, uid: u64) -> Result<String> {
        self.entities.ensure_started(uid).await
    }
}

/// Uniform-random free-port selection within `[start, end]`, skipping the
/// ports already in `used`: draw a candidate in the free subrange, then
/// walk past any occupied port at or above it.
fn pick_free_port(start: u16, end: u16, used: &[u16]) -> Result<u16> {
    if used.len() >= (end - start + 1) as usize {
        return Err(Error::TooManyPorts);
    }
    let free_span = end - start + 1 - used.len() as u16;
    let mut candidate = start + rand::random::<u16>() % free_span;
    let mut sorted = used.to_vec();
    sorted.sort_unstable();
    for &p in &sorted {
        if candidate < p {
            break;
        }
        candidate += 1;
    }
    Ok(candidate)
}

async fn verify_domain_txt_record(domain: &str, uid: u64) -> Result<()> {
    use hickory_resolver::config::{ResolverConfig, ResolverOpts};
    use hickory_resolver::TokioAsyncResolver;

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    let lookup = resolver
        .txt_lookup(domain)
        .await
        .map_err(|e| Error::Internal(e.into()))?;

    let expected = wsd_core::naming::domain_verification_record(uid);
    let verified = lookup
        .iter()
        .any(|txt| txt.to_string() == expected);
    if !verified {
        return Err(Error::DomainUnverified);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_free_port_avoids_used_ports() {
        let chosen = pick_free_port(1000, 1010, &[1000, 1001, 1002]).unwrap();
        assert!(chosen >= 1000 && chosen <= 1010);
        assert!(!(1000..=1002).contains(&chosen));
    }

    #[test]
    fn pick_free_port_errors_when_exhausted() {
        let used: Vec<u16> = (1000..=1010).collect();
        assert!(matches!(pick_free_port(1000, 1010, &used), Err(Error::TooManyPorts)));
    }
}
