// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The webspace entity (§4.4): load/save through the hypervisor's reserved
//! config key, IP resolution, and the create-time SSH bootstrap sequence.
//! Cross-webspace invariants (domain/port uniqueness) and locking live in
//! `wsd-engine::manager`, which is the only thing that holds an `Entities`.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};
use wsd_adapters::hypervisor::{Hypervisor, InstanceStatus};
use wsd_core::{Error, Result, Webspace};
use wsd_wire::PersistedWebspace;

use crate::config::EngineConfig;

/// Picks the SSH-daemon install command for an image's `os` property, or
/// `None` if the OS isn't one we know how to bootstrap.
pub fn ssh_install_command(os: &str) -> Option<&'static str> {
    match os.to_ascii_lowercase().as_str() {
        "alpine" => Some("apk update && apk add dropbear && rc-update add dropbear"),
        "archlinux" => Some("pacman -Sy --noconfirm openssh && systemctl enable sshd"),
        "ubuntu" | "debian" => Some("apt-get -qy update && apt-get -qy install openssh-server"),
        "fedora" | "centos" => Some("dnf install -qy openssh-server && systemctl enable sshd"),
        _ => None,
    }
}

/// Loads, persists, and bootstraps webspace entities against the
/// hypervisor. Stateless beyond its handle to the hypervisor client and the
/// engine configuration — every call re-reads or re-writes the reserved
/// config key, matching the source's lack of any in-process cache.
pub struct Entities {
    hypervisor: std::sync::Arc<dyn Hypervisor>,
    config: EngineConfig,
}

impl Entities {
    pub fn new(hypervisor: std::sync::Arc<dyn Hypervisor>, config: EngineConfig) -> Self {
        Self { hypervisor, config }
    }

    pub fn instance_name(&self, uid: u64) -> String {
        wsd_core::naming::instance_name(&self.config.instance_prefix, uid)
    }

    fn serialize(&self, w: &Webspace) -> Result<String> {
        w.config.validate()?;
        let persisted = PersistedWebspace::from(w);
        serde_json::to_string(&persisted).map_err(|e| Error::Internal(e.into()))
    }

    fn deserialize(&self, blob: &str) -> Result<Webspace> {
        let persisted: PersistedWebspace =
            serde_json::from_str(blob).map_err(|e| Error::Internal(e.into()))?;
        let w = Webspace::from(persisted);
        w.config.validate()?;
        Ok(w)
    }

    /// Loads a webspace by user id. `user_hint` is the caller's own id,
    /// when the caller isn't an admin — if set and it doesn't match `uid`,
    /// this refuses before ever touching the hypervisor.
    pub async fn get(&self, uid: u64, user_hint: Option<u64>) -> Result<Webspace> {
        if let Some(hint) = user_hint {
            if hint != uid {
                return Err(Error::UidMismatch);
            }
        }
        let name = self.instance_name(uid);
        let blob = self
            .hypervisor
            .get_config_key(&name, &self.config.config_key)
            .await?
            .ok_or(Error::NotFound)?;
        self.deserialize(&blob)
    }

    /// Every instance carrying the reserved config key, as `(name,
    /// webspace)` pairs.
    pub async fn get_all(&self) -> Result<Vec<(String, Webspace)>> {
        let entries = self
            .hypervisor
            .list_config_entries(&self.config.config_key)
            .await?;
        let mut out = Vec::with_capacity(entries.len());
        for (name, blob) in entries {
            match self.deserialize(&blob) {
                Ok(w) => out.push((name, w)),
                Err(err) => warn!(name, error = %err, "skipping webspace with corrupt config"),
            }
        }
        Ok(out)
    }

    pub async fn save(&self, uid: u64, w: &Webspace) -> Result<()> {
        let name = self.instance_name(uid);
        let blob = self.serialize(w)?;
        self.hypervisor.set_config_key(&name, &self.config.config_key, &blob).await
    }

    /// Creates a new instance and hydrates a default webspace for it.
    /// Resolves `image` as a fingerprint directly when it already looks
    /// like a SHA-256 hex digest, otherwise as an alias.
    pub async fn create(
        &self,
        uid: u64,
        image: &str,
        password: Option<&str>,
        ssh_key: Option<&str>,
    ) -> Result<Webspace> {
        let name = self.instance_name(uid);
        let fingerprint = self.resolve_fingerprint(image).await?;

        let mut w = Webspace::new(uid);
        w.config = self.config.config_defaults.clone();

        self.hypervisor.create_instance(&name, &fingerprint).await?;
        self.save(uid, &w).await?;

        if password.is_some() || ssh_key.is_some() {
            self.hypervisor.boot(&name).await?;
            self.await_ip(uid).await?;

            if let Some(password) = password {
                let outcome = self
                    .hypervisor
                    .exec(&name, &format!("echo \"root:{password}\" | chpasswd"))
                    .await?;
                if outcome.exit_code != 0 {
                    warn!(uid, stderr = %outcome.stderr, "failed to set root password");
                }
            }

            if let Some(ssh_key) = ssh_key {
                self.install_ssh_key(uid, &name, &fingerprint, ssh_key, &mut w).await?;
            }

            self.hypervisor.shutdown(&name).await?;
        }

        Ok(w)
    }

    async fn resolve_fingerprint(&self, image: &str) -> Result<String> {
        if is_sha256_hex(image) {
            return Ok(image.to_string());
        }
        let images = self.hypervisor.list_images().await?;
        images
            .into_iter()
            .find(|i| i.aliases.iter().any(|a| a == image))
            .map(|i| i.fingerprint)
            .ok_or(Error::NotFound)
    }

    async fn install_ssh_key(
        &self,
        uid: u64,
        name: &str,
        fingerprint: &str,
        ssh_key: &str,
        w: &mut Webspace,
    ) -> Result<()> {
        let images = self.hypervisor.list_images().await?;
        let image = images.into_iter().find(|i| i.fingerprint == fingerprint);
        let os = image.as_ref().and_then(|i| i.os());

        match os {
            None => warn!(uid, "image has no `os` property, unable to install sshd"),
            Some(os) => match ssh_install_command(os) {
                None => warn!(uid, os, "unknown OS, unable to install sshd"),
                Some(cmd) => {
                    let outcome = self.hypervisor.exec(name, cmd).await?;
                    if outcome.exit_code != 0 {
                        warn!(uid, stderr = %outcome.stderr, "failed to install sshd");
                        return Ok(());
                    }
                    let write_key = format!(
                        "mkdir -p /root/.ssh && echo \"{ssh_key}\" > /root/.ssh/authorized_keys"
                    );
                    self.hypervisor.exec(name, &write_key).await?;
                    w.add_port(0, 22, self.config.ports.max)?;
                }
            },
        }
        Ok(())
    }

    pub async fn delete(&self, uid: u64) -> Result<()> {
        let name = self.instance_name(uid);
        let state = self.hypervisor.state(&name).await?;
        if state.status == InstanceStatus::Running {
            self.hypervisor.shutdown(&name).await?;
        }
        self.hypervisor.delete_instance(&name).await
    }

    pub async fn boot(&self, uid: u64) -> Result<()> {
        self.hypervisor.boot(&self.instance_name(uid)).await
    }

    pub async fn reboot(&self, uid: u64) -> Result<()> {
        self.hypervisor.reboot(&self.instance_name(uid)).await
    }

    pub async fn shutdown(&self, uid: u64) -> Result<()> {
        self.hypervisor.shutdown(&self.instance_name(uid)).await
    }

    pub async fn get_ip(&self, uid: u64) -> Result<String> {
        let name = self.instance_name(uid);
        let state = self.hypervisor.state(&name).await?;
        let iface = state
            .network
            .iter()
            .find(|i| i.name == "eth0")
            .ok_or(Error::Interface)?;
        iface
            .addresses
            .iter()
            .filter(|a| a.family == "inet" && a.scope == "global")
            .last()
            .map(|a| a.address.clone())
            .ok_or(Error::Address)
    }

    /// Retries `get_ip` with exponential backoff up to the configured
    /// elapsed-time cap.
    pub async fn await_ip(&self, uid: u64) -> Result<String> {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.ip_timeout),
            ..ExponentialBackoff::default()
        };

        loop {
            match self.get_ip(uid).await {
                Ok(ip) => return Ok(ip),
                Err(err) => match backoff.next_backoff() {
                    Some(delay) => {
                        debug!(uid, ?delay, "failed to get webspace IP");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
            }
        }
    }

    /// Boots the webspace if it isn't running, waiting out the configured
    /// startup delay, and returns its IP either way.
    pub async fn ensure_started(&self, uid: u64) -> Result<String> {
        let name = self.instance_name(uid);
        let state = self.hypervisor.state(&name).await?;
        if state.status == InstanceStatus::Running {
            return self.await_ip(uid).await;
        }

        self.hypervisor.boot(&name).await?;
        let ip = self.await_ip(uid).await?;

        let w = self.get(uid, None).await?;
        tokio::time::sleep(Duration::from_secs_f64(w.config.startup_delay)).await;
        Ok(ip)
    }
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_install_command_covers_known_distros() {
        assert!(ssh_install_command("alpine").is_some());
        assert!(ssh_install_command("Ubuntu").is_some());
        assert!(ssh_install_command("CentOS").is_some());
        assert!(ssh_install_command("plan9").is_none());
    }

    #[test]
    fn sha256_hex_detection() {
        assert!(is_sha256_hex(&"a".repeat(64)));
        assert!(!is_sha256_hex(&"a".repeat(63)));
        assert!(!is_sha256_hex("not-hex-and-wrong-length"));
    }
}
