// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wsd-wire: wire types for the webspace control plane's HTTP/WebSocket API
//! and persisted state.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod console;
pub mod http;
pub mod persisted;

pub use console::{ConsoleControlFrame, ExecControlFrame, ResizeRequest};
pub use http::{
    AllocatePortRequest, AllocatedPortResponse, CreateWebspaceRequest, ExecRequest, ExecResponse,
    ImageResponse, PatchConfigRequest, ProblemResponse, StateResponse, WebspaceResponse,
};
pub use persisted::PersistedWebspace;
