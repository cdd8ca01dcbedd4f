// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tracing`-based observability setup. An `EnvFilter` sourced from
//! `RUST_LOG` (falling back to the config file's `logLevel`) drives a
//! `fmt` layer; when a log directory is configured, a non-blocking
//! `tracing-appender` rolling file writer is installed alongside stdout.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Holds the worker thread for the non-blocking file appender, when one is
/// active. Must be kept alive for the process lifetime; dropping it stops
/// the writer.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init(log_level: &str, log_dir: Option<&str>) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wsd.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            LoggingGuard { _file_guard: Some(guard) }
        }
        None => {
            tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
            LoggingGuard { _file_guard: None }
        }
    }
}
