// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-interactive exec (§4.5): `sh -c <cmd>` inside the instance, with an
//! optional boot-if-stopped precondition. The hypervisor adapter already
//! does the "record output, decode UTF-8" work (`Hypervisor::exec`); this
//! module only adds the `ensureBooted` precondition and the
//! error-on-nonzero-exit convenience variant the source calls
//! `simpleExec`.

use wsd_adapters::hypervisor::{ExecOutcome, Hypervisor, InstanceStatus};
use wsd_core::{Error, Result};

pub struct ExecRequest<'a> {
    pub instance_name: &'a str,
    pub command: &'a str,
    pub ensure_booted: bool,
}

pub async fn exec(hypervisor: &dyn Hypervisor, req: ExecRequest<'_>) -> Result<ExecOutcome> {
    if req.ensure_booted {
        let state = hypervisor.state(req.instance_name).await?;
        if state.status != InstanceStatus::Running {
            hypervisor
                .boot(req.instance_name)
                .await
                .map_err(|e| Error::Internal(anyhow::anyhow!("failed to start webspace: {e}")))?;
        }
    }

    hypervisor.exec(req.instance_name, req.command).await
}

/// Runs `exec` and turns a nonzero exit code into an error, for callers
/// (webspace creation's SSH bootstrap) that only care whether the command
/// succeeded.
pub async fn simple_exec(hypervisor: &dyn Hypervisor, instance_name: &str, command: &str) -> Result<()> {
    let outcome = exec(
        hypervisor,
        ExecRequest {
            instance_name,
            command,
            ensure_booted: false,
        },
    )
    .await?;

    if outcome.exit_code != 0 {
        return Err(Error::Internal(anyhow::anyhow!(
            "exit with non-zero exit status: {}",
            outcome.exit_code
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsd_adapters::hypervisor::fake::FakeHypervisor;

    #[tokio::test]
    async fn ensure_booted_boots_a_stopped_instance() {
        let hv = FakeHypervisor::new();
        hv.create_instance("ws-u7", "fingerprint").await.unwrap();

        let outcome = exec(
            &hv,
            ExecRequest {
                instance_name: "ws-u7",
                command: "true",
                ensure_booted: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(hv.state("ws-u7").await.unwrap().status, InstanceStatus::Running);
    }
}
