// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entry point: loads configuration, starts logging, and runs the daemon
//! until a signal or a config-file change asks it to stop. On a config
//! change the whole server — hypervisor client, manager, edge provider,
//! forwarder, and HTTP listener — is torn down and rebuilt from the
//! reloaded configuration (§9).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use wsd_daemon::config::{self, Cli, Config};
use wsd_daemon::{logging, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::load(&cli)?;
    let _logging_guard = logging::init(&cfg.log_level, cfg.log_dir.as_deref());

    loop {
        let server = Server::build(&cfg).await?;
        let reload = Arc::new(AtomicBool::new(false));
        let shutdown = shutdown_or_reload(config::config_path(&cli), reload.clone());

        server.serve(&cfg.bind_addr, shutdown).await?;

        if !reload.load(Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("config file changed, reloading");
        cfg = Config::load(&cli)?;
    }
}

async fn shutdown_or_reload(config_path: Option<PathBuf>, reload: Arc<AtomicBool>) {
    tokio::select! {
        () = terminate_signal() => {}
        () = wait_for_config_change(config_path) => {
            reload.store(true, Ordering::SeqCst);
        }
    }
}

async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

/// Resolves once the config file named by `path` changes on disk. Never
/// resolves if there is no file source in effect, or if the watcher fails
/// to start (hot-reload is then simply unavailable for this run).
async fn wait_for_config_change(path: Option<PathBuf>) {
    let Some(path) = path else {
        std::future::pending::<()>().await;
        return;
    };

    let watch_dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));
    let file_name = path.file_name().map(|f| f.to_owned());

    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            let matches = file_name
                .as_deref()
                .map(|name| event.paths.iter().any(|p| p.file_name() == Some(name)))
                .unwrap_or(true);
            if matches {
                let _ = tx.try_send(());
            }
        }
    });

    let mut watcher = match watcher {
        Ok(w) => w,
        Err(err) => {
            tracing::warn!(error = %err, "failed to start config watcher; hot-reload disabled");
            std::future::pending::<()>().await;
            return;
        }
    };

    use notify::Watcher;
    if let Err(err) = watcher.watch(&watch_dir, notify::RecursiveMode::NonRecursive) {
        tracing::warn!(error = %err, "failed to watch config directory; hot-reload disabled");
        std::future::pending::<()>().await;
        return;
    }

    rx.recv().await;
}
