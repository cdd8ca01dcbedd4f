// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The interactive console/exec bridge (§4.6): a message-oriented client
//! transport (text control frames, binary data frames) multiplexed onto a
//! remote PTY. Deliberately transport-agnostic — `wsd-daemon` adapts an
//! Axum WebSocket to [`FrameSink`]/[`FrameSource`] so this crate never
//! depends on an HTTP framework.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use wsd_wire::console::{ConsoleControlFrame, ExecControlFrame};

/// A frame crossing the client transport, already stripped of whatever
/// wire envelope the concrete transport uses.
#[derive(Debug, Clone)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: Frame) -> wsd_core::Result<()>;
}

#[async_trait]
pub trait FrameSource: Send {
    /// `None` means the transport closed without sending an explicit close
    /// frame.
    async fn recv(&mut self) -> Option<Frame>;
}

/// The remote side: either a console log stream or an interactive exec
/// session. `write`/`read` carry raw PTY bytes; `resize`/`signal` apply a
/// control-frame action; `wait` resolves once the remote process exits.
#[async_trait]
pub trait RemoteSession: Send {
    async fn write(&mut self, data: &[u8]) -> wsd_core::Result<()>;
    /// Reads the next chunk of output. `Ok(0)` signals the remote side
    /// exited; the caller should then call `wait` for the exit code.
    async fn read(&mut self, buf: &mut [u8]) -> wsd_core::Result<usize>;
    async fn resize(&mut self, width: u16, height: u16) -> wsd_core::Result<()>;
    async fn signal(&mut self, signal: i32) -> wsd_core::Result<()>;
    async fn wait(&mut self) -> wsd_core::Result<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Console,
    Exec,
}

enum Outcome {
    RemoteExited(i32),
    ClientClosed,
    Error(wsd_core::Error),
}

/// Runs the bridge to completion. `open` is invoked with the first resize
/// request's dimensions once received — the remote session is not created
/// before then, per the initialization invariant.
pub async fn run<F, Fut>(
    kind: SessionKind,
    sink: Arc<dyn FrameSink>,
    mut source: Box<dyn FrameSource>,
    open: F,
) -> wsd_core::Result<()>
where
    F: FnOnce(u16, u16) -> Fut + Send,
    Fut: std::future::Future<Output = wsd_core::Result<Box<dyn RemoteSession>>> + Send,
{
    let (width, height) = match source.recv().await {
        Some(Frame::Text(text)) => parse_initial_size(kind, &text)?,
        _ => {
            sink.send(Frame::Close {
                code: 1002,
                reason: "first message must be the initial size request".into(),
            })
            .await?;
            return Err(wsd_core::Error::BadValue(
                "first message must be the initial size request".into(),
            ));
        }
    };

    let remote: Arc<AsyncMutex<Box<dyn RemoteSession>>> = Arc::new(AsyncMutex::new(open(width, height).await?));

    let (data_tx, mut data_rx) = mpsc::channel::<Vec<u8>>(32);
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<Outcome>(3);

    // Control-reader task: demultiplexes the client stream. Binary frames
    // are handed to the client->remote writer task below; text frames are
    // applied as resize/signal control actions inline.
    let control_outcome = outcome_tx.clone();
    let control_remote = remote.clone();
    let control_task = tokio::spawn(async move {
        loop {
            match source.recv().await {
                Some(Frame::Binary(data)) => {
                    if data_tx.send(data).await.is_err() {
                        return;
                    }
                }
                Some(Frame::Text(text)) => {
                    let mut remote = control_remote.lock().await;
                    if let Err(err) = apply_control_frame(kind, &text, remote.as_mut()).await {
                        let _ = control_outcome.send(Outcome::Error(err)).await;
                        return;
                    }
                }
                Some(Frame::Close { .. }) | None => {
                    let _ = control_outcome.send(Outcome::ClientClosed).await;
                    return;
                }
            }
        }
    });

    // client->remote copy task: forwards demultiplexed binary payloads to
    // the remote's stdin.
    let writer_outcome = outcome_tx.clone();
    let writer_remote = remote.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(data) = data_rx.recv().await {
            if let Err(err) = writer_remote.lock().await.write(&data).await {
                let _ = writer_outcome.send(Outcome::Error(err)).await;
                return;
            }
        }
    });

    // remote->client copy task: forwards remote output as binary frames,
    // detecting process exit on EOF.
    let reader_outcome = outcome_tx.clone();
    let reader_sink = sink.clone();
    let reader_remote = remote.clone();
    let reader_task = tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        loop {
            let n = match reader_remote.lock().await.read(&mut buf).await {
                Ok(n) => n,
                Err(err) => {
                    let _ = reader_outcome.send(Outcome::Error(err)).await;
                    return;
                }
            };
            if n == 0 {
                let code = reader_remote.lock().await.wait().await.unwrap_or(-1);
                let _ = reader_outcome.send(Outcome::RemoteExited(code)).await;
                return;
            }
            if let Err(err) = reader_sink.send(Frame::Binary(buf[..n].to_vec())).await {
                let _ = reader_outcome.send(Outcome::Error(err)).await;
                return;
            }
        }
    });

    let outcome = outcome_rx.recv().await.unwrap_or(Outcome::ClientClosed);
    control_task.abort();
    writer_task.abort();
    reader_task.abort();

    match outcome {
        Outcome::RemoteExited(code) => {
            sink.send(Frame::Close {
                code: 1000,
                reason: code.to_string(),
            })
            .await?;
            Ok(())
        }
        Outcome::ClientClosed => Ok(()),
        Outcome::Error(err) => {
            sink.send(Frame::Close {
                code: 1011,
                reason: err.to_string(),
            })
            .await?;
            Err(err)
        }
    }
}

fn parse_initial_size(kind: SessionKind, text: &str) -> wsd_core::Result<(u16, u16)> {
    match kind {
        SessionKind::Console => {
            let frame: ConsoleControlFrame =
                serde_json::from_str(text).map_err(|e| wsd_core::Error::BadValue(e.to_string()))?;
            Ok((frame.width, frame.height))
        }
        SessionKind::Exec => {
            let frame: ExecControlFrame =
                serde_json::from_str(text).map_err(|e| wsd_core::Error::BadValue(e.to_string()))?;
            let resize = frame
                .resize
                .ok_or_else(|| wsd_core::Error::BadValue("first exec message must set resize".into()))?;
            Ok((resize.width, resize.height))
        }
    }
}

async fn apply_control_frame(
    kind: SessionKind,
    text: &str,
    remote: &mut dyn RemoteSession,
) -> wsd_core::Result<()> {
    match kind {
        SessionKind::Console => {
            let frame: ConsoleControlFrame =
                serde_json::from_str(text).map_err(|e| wsd_core::Error::BadValue(e.to_string()))?;
            remote.resize(frame.width, frame.height).await
        }
        SessionKind::Exec => {
            let frame: ExecControlFrame =
                serde_json::from_str(text).map_err(|e| wsd_core::Error::BadValue(e.to_string()))?;
            if let Some(resize) = frame.resize {
                if resize.width != 0 || resize.height != 0 {
                    remote.resize(resize.width, resize.height).await?;
                }
            }
            if let Some(signal) = frame.signal {
                if signal != 0 {
                    remote.signal(signal).await?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct EchoRemote {
        buf: std::collections::VecDeque<u8>,
        exited: Option<i32>,
    }

    #[async_trait]
    impl RemoteSession for EchoRemote {
        async fn write(&mut self, data: &[u8]) -> wsd_core::Result<()> {
            self.buf.extend(data);
            Ok(())
        }

        async fn read(&mut self, out: &mut [u8]) -> wsd_core::Result<usize> {
            if self.buf.is_empty() {
                if self.exited.is_some() {
                    return Ok(0);
                }
                return Ok(0);
            }
            let n = self.buf.len().min(out.len());
            for slot in out.iter_mut().take(n) {
                *slot = self.buf.pop_front().unwrap();
            }
            Ok(n)
        }

        async fn resize(&mut self, _w: u16, _h: u16) -> wsd_core::Result<()> {
            Ok(())
        }

        async fn signal(&mut self, _s: i32) -> wsd_core::Result<()> {
            Ok(())
        }

        async fn wait(&mut self) -> wsd_core::Result<i32> {
            Ok(self.exited.unwrap_or(0))
        }
    }

    struct RecordingSink {
        frames: StdMutex<Vec<Frame>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send(&self, frame: Frame) -> wsd_core::Result<()> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    struct ScriptedSource {
        frames: std::collections::VecDeque<Frame>,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn recv(&mut self) -> Option<Frame> {
            self.frames.pop_front()
        }
    }

    #[test]
    fn console_initial_frame_must_carry_dimensions() {
        let err = parse_initial_size(SessionKind::Console, "not json");
        assert!(err.is_err());
    }

    #[test]
    fn exec_initial_frame_requires_resize() {
        let err = parse_initial_size(SessionKind::Exec, "{}");
        assert!(err.is_err());
        let ok = parse_initial_size(SessionKind::Exec, r#"{"resize":{"width":80,"height":24}}"#);
        assert_eq!(ok.unwrap(), (80, 24));
    }

    #[tokio::test]
    async fn missing_initial_frame_closes_with_error() {
        let sink = Arc::new(RecordingSink {
            frames: StdMutex::new(Vec::new()),
        });
        let source = Box::new(ScriptedSource {
            frames: std::collections::VecDeque::from([Frame::Binary(vec![1])]),
        });
        let result = run(SessionKind::Console, sink.clone(), source, |_, _| async {
            Ok(Box::new(EchoRemote {
                buf: Default::default(),
                exited: None,
            }) as Box<dyn RemoteSession>)
        })
        .await;
        assert!(result.is_err());
        let frames = sink.frames.lock().unwrap();
        assert!(matches!(frames.first(), Some(Frame::Close { code: 1002, .. })));
    }
}
