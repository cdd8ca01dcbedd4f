// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The webspace error taxonomy.
//!
//! Every fallible operation in `wsd-core`, `wsd-engine` and `wsd-adapters`
//! returns [`Error`]. The HTTP boundary (`wsd-daemon`) maps each variant to a
//! status code; the mapping is fixed and must not drift case by case.

use thiserror::Error;

/// The webspace error taxonomy.
///
/// Variants are named after the condition they represent, not the status
/// code they happen to map to, so the mapping in `wsd-daemon::http::error`
/// stays a single table rather than scattered `match`es.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    Exists,

    #[error("used by a webspace")]
    Used,

    #[error("already running")]
    Running,

    #[error("not running")]
    NotRunning,

    #[error("{0}")]
    BadValue(String),

    #[error("invalid port")]
    BadPort,

    #[error("port forward limit reached")]
    TooManyPorts,

    #[error("cannot remove the default domain")]
    DefaultDomain,

    #[error("verification failed")]
    DomainUnverified,

    #[error("this endpoint supports websocket communication only")]
    WebsocketRequired,

    #[error("token required for this endpoint")]
    TokenRequired,

    #[error("only admin users can make use of this endpoint")]
    AdminRequired,

    #[error("default network interface not present")]
    Interface,

    #[error("IPv4 address not found")]
    Address,

    #[error("invalid Traefik provider")]
    EdgeProviderConfig,

    #[error("edge provider error: {0}")]
    EdgeProvider(String),

    #[error("user id doesn't match provided value")]
    UidMismatch,

    #[error("hypervisor error: {0}")]
    Hypervisor(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// True for the variants that represent a problem with caller input
    /// rather than server state.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::BadValue(_)
                | Error::BadPort
                | Error::TooManyPorts
                | Error::DefaultDomain
                | Error::DomainUnverified
                | Error::WebsocketRequired
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_classification_matches_taxonomy() {
        assert!(Error::BadPort.is_client_error());
        assert!(!Error::NotFound.is_client_error());
        assert!(!Error::Hypervisor("boom".into()).is_client_error());
    }
}
