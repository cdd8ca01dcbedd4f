// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapts an Axum WebSocket to `wsd-engine::bridge`'s transport-agnostic
//! `FrameSink`/`FrameSource`, and a hypervisor `InteractiveSession` to the
//! engine's `RemoteSession`, so `bridge::run` can drive either console or
//! exec traffic without this crate's handlers reimplementing the
//! multiplexing logic.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use wsd_engine::bridge::{Frame, FrameSink, FrameSource, RemoteSession};

pub struct WsSink(Mutex<SplitSink<WebSocket, Message>>);

impl WsSink {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self(Mutex::new(sink))
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&self, frame: Frame) -> wsd_core::Result<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        };
        self.0
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| wsd_core::Error::Internal(e.into()))
    }
}

pub struct WsSource(SplitStream<WebSocket>);

impl WsSource {
    pub fn new(stream: SplitStream<WebSocket>) -> Self {
        Self(stream)
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<Frame> {
        loop {
            return match self.0.next().await {
                Some(Ok(Message::Text(text))) => Some(Frame::Text(text.to_string())),
                Some(Ok(Message::Binary(data))) => Some(Frame::Binary(data.to_vec())),
                Some(Ok(Message::Close(frame))) => Some(Frame::Close {
                    code: frame.as_ref().map(|f| f.code).unwrap_or(1000),
                    reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                }),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Err(_)) | None => None,
            };
        }
    }
}

/// Bridges a hypervisor-level interactive session onto the engine's
/// transport-agnostic `RemoteSession` contract. Both traits have the same
/// shape by construction; this is pure pass-through.
pub struct SessionBridge(pub Box<dyn wsd_adapters::hypervisor::InteractiveSession>);

#[async_trait]
impl RemoteSession for SessionBridge {
    async fn write(&mut self, data: &[u8]) -> wsd_core::Result<()> {
        self.0.write(data).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> wsd_core::Result<usize> {
        self.0.read(buf).await
    }

    async fn resize(&mut self, width: u16, height: u16) -> wsd_core::Result<()> {
        self.0.resize(width, height).await
    }

    async fn signal(&mut self, signal: i32) -> wsd_core::Result<()> {
        self.0.signal(signal).await
    }

    async fn wait(&mut self) -> wsd_core::Result<i32> {
        self.0.wait().await
    }
}
