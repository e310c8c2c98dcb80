//! Transcoder process boundary.
//!
//! A [`Launcher`] turns a [`TranscoderInvocation`] into a running process
//! and hands back a [`ProcessHandle`]: an ordered event stream plus a
//! control channel. The supervisor never talks to the OS process directly,
//! which keeps the lifecycle logic independent of ffmpeg and lets tests
//! script a process with [`ProcessHandle::pair`].

pub mod ffmpeg;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

use crate::config::TranscoderPolicy;
use crate::error::SessionError;
use crate::key::StreamKey;
use crate::paths::ResourcePaths;
use crate::source::SourceLocator;

pub use ffmpeg::FfmpegLauncher;

const EVENT_BUFFER: usize = 64;

/// Everything a launcher needs to start one conversion.
#[derive(Debug, Clone)]
pub struct TranscoderInvocation {
    pub key: StreamKey,
    pub source: SourceLocator,
    pub paths: ResourcePaths,
    pub policy: TranscoderPolicy,
}

/// Latest progress figures reported by a running transcoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub frame: Option<u64>,
    pub fps: Option<f32>,
    pub out_time_ms: Option<u64>,
    pub speed: Option<f32>,
    pub total_size: Option<u64>,
}

impl ProgressSnapshot {
    /// True once the process has written any media.
    pub fn has_output(&self) -> bool {
        self.frame.is_some_and(|f| f > 0)
            || self.out_time_ms.is_some_and(|t| t > 0)
            || self.total_size.is_some_and(|s| s > 0)
    }
}

/// Events emitted by a process, in order. `Failed` and `Ended` are
/// terminal and are followed by the channel closing.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Started,
    Progress(ProgressSnapshot),
    Failed(String),
    Ended,
}

impl ProcessEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessEvent::Failed(_) | ProcessEvent::Ended)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Ask the process to finish its current segment and exit
    Terminate,
    /// Kill immediately
    Kill,
}

/// Supervisor-side handle to one spawned process.
#[derive(Debug)]
pub struct ProcessHandle {
    controller: ProcessController,
    events: mpsc::Receiver<ProcessEvent>,
}

impl ProcessHandle {
    /// Create a handle together with the implementation-side driver.
    pub fn pair(pid: Option<u32>) -> (ProcessHandle, ProcessDriver) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let handle = ProcessHandle {
            controller: ProcessController {
                pid,
                signals: signal_tx,
            },
            events: event_rx,
        };
        let driver = ProcessDriver {
            events: event_tx,
            signals: signal_rx,
        };

        (handle, driver)
    }

    pub fn pid(&self) -> Option<u32> {
        self.controller.pid
    }

    pub fn controller(&self) -> ProcessController {
        self.controller.clone()
    }

    /// Next event, or `None` once the process side has gone away.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }
}

/// Cloneable control half of a [`ProcessHandle`].
#[derive(Debug, Clone)]
pub struct ProcessController {
    pid: Option<u32>,
    signals: mpsc::UnboundedSender<ProcessSignal>,
}

impl ProcessController {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns false if the process side is already gone.
    pub fn terminate(&self) -> bool {
        self.signals.send(ProcessSignal::Terminate).is_ok()
    }

    pub fn kill(&self) -> bool {
        self.signals.send(ProcessSignal::Kill).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.signals.is_closed()
    }
}

/// Implementation side of a process: publishes events, receives signals.
#[derive(Debug)]
pub struct ProcessDriver {
    events: mpsc::Sender<ProcessEvent>,
    signals: mpsc::UnboundedReceiver<ProcessSignal>,
}

impl ProcessDriver {
    /// Deliver an event, waiting for buffer space. Returns false if the
    /// supervisor stopped listening.
    pub async fn emit(&self, event: ProcessEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Deliver an event only if there is room; used for progress so a slow
    /// consumer never stalls the process pipes.
    pub fn try_emit(&self, event: ProcessEvent) -> bool {
        self.events.try_send(event).is_ok()
    }

    pub async fn next_signal(&mut self) -> Option<ProcessSignal> {
        self.signals.recv().await
    }
}

/// Starts transcoder processes.
#[async_trait]
pub trait Launcher: Send + Sync + fmt::Debug {
    async fn launch(
        &self,
        invocation: &TranscoderInvocation,
    ) -> Result<ProcessHandle, SessionError>;
}
