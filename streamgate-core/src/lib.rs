//! # Streamgate Core
//!
//! On-demand session supervisor that turns live sources (RTSP cameras and
//! the like) into HLS playlists only while somebody is watching.
//!
//! ## Overview
//!
//! - **Session Registry**: one authoritative session per stream key, created
//!   atomically so concurrent viewers never spawn a second transcoder
//! - **Lifecycle**: `Starting → Ready → Stopping → Stopped`, driven by the
//!   transcoder's own event stream
//! - **Readiness Signal**: one completion signal shared by every waiting
//!   request
//! - **Idle Eviction**: a per-session timer, rearmed on every access
//! - **Cleanup**: idempotent removal of the session's output directory
//!
//! ## Architecture
//!
//! - [`supervisor`]: request entry point and per-session driver
//! - [`registry`]: key → session map
//! - [`session`]: session state machine and idle timer
//! - [`readiness`]: single-assignment readiness signal
//! - [`process`]: launcher trait, process handle and the ffmpeg launcher
//! - [`cleanup`]: output directory removal and orphan sweep
//! - [`source`]: key → upstream locator resolution
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamgate_core::{
//!     FfmpegLauncher, SessionSupervisor, StaticSources, SupervisorConfig,
//! };
//!
//! async fn serve_camera() -> Result<(), streamgate_core::SessionError> {
//!     let sources = StaticSources::default()
//!         .with_template("rtsp://cameras.local/{key}");
//!     let supervisor = SessionSupervisor::new(
//!         SupervisorConfig::default(),
//!         Arc::new(FfmpegLauncher::new()),
//!         Arc::new(sources),
//!     );
//!
//!     let artifact = supervisor.request_session("7").await?;
//!     println!("playlist at {}", artifact.playlist.display());
//!     Ok(())
//! }
//! ```

pub mod cleanup;
pub mod config;
pub mod error;
pub mod key;
pub mod paths;
pub mod process;
pub mod readiness;
pub mod registry;
pub mod session;
pub mod source;
pub mod supervisor;

pub use cleanup::{CleanupCoordinator, CleanupOutcome};
pub use config::{CodecMode, RtspTransport, SupervisorConfig, TranscoderPolicy};
pub use error::{Result, SessionError};
pub use key::StreamKey;
pub use paths::ResourcePaths;
pub use process::{
    FfmpegLauncher, Launcher, ProcessController, ProcessDriver, ProcessEvent,
    ProcessHandle, ProcessSignal, ProgressSnapshot, TranscoderInvocation,
};
pub use readiness::{Readiness, ReadinessFailure, WaitResult};
pub use registry::SessionRegistry;
pub use session::{Session, SessionSnapshot, SessionState, StopReason};
pub use source::{SourceLocator, SourceRegistry, StaticSources};
pub use supervisor::{ReadyArtifact, SessionSupervisor};
