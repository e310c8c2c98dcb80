//! Request entry point and per-session lifecycle driver.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::cleanup::{CleanupCoordinator, CleanupOutcome};
use crate::config::SupervisorConfig;
use crate::error::{Result, SessionError};
use crate::key::StreamKey;
use crate::paths::ResourcePaths;
use crate::process::{
    Launcher, ProcessEvent, ProcessHandle, TranscoderInvocation,
};
use crate::readiness::{ReadinessFailure, WaitResult};
use crate::registry::SessionRegistry;
use crate::session::{
    Session, SessionSnapshot, SessionState, SessionTimings, StopReason,
};
use crate::source::{SourceLocator, SourceRegistry};

/// A ready session's playlist, handed back to the caller.
#[derive(Debug, Clone)]
pub struct ReadyArtifact {
    pub key: StreamKey,
    pub session_id: Uuid,
    pub generation: u64,
    pub playlist: PathBuf,
    pub output_dir: PathBuf,
}

struct Shared {
    config: SupervisorConfig,
    registry: SessionRegistry,
    launcher: Arc<dyn Launcher>,
    sources: Arc<dyn SourceRegistry>,
    cleanup: CleanupCoordinator,
    generation: AtomicU64,
    shutting_down: AtomicBool,
    drained: Notify,
}

/// Starts conversions on first request, keeps them alive while they are
/// being watched and tears them down when they are not.
///
/// Cloning is cheap; every clone drives the same set of sessions.
#[derive(Clone)]
pub struct SessionSupervisor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSupervisor")
            .field("output_root", &self.shared.config.output_root)
            .field("sessions", &self.shared.registry.len())
            .finish()
    }
}

impl SessionSupervisor {
    pub fn new(
        config: SupervisorConfig,
        launcher: Arc<dyn Launcher>,
        sources: Arc<dyn SourceRegistry>,
    ) -> Self {
        let cleanup = CleanupCoordinator::new(config.output_root.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                registry: SessionRegistry::new(),
                launcher,
                sources,
                cleanup,
                generation: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                drained: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.shared.registry
    }

    /// Resolve `raw` to a ready playlist, starting a conversion if none is
    /// running.
    ///
    /// Fails with [`SessionError::Validation`] for a malformed key and
    /// [`SessionError::NotConfigured`] for a key without a source, both
    /// before any session is created. A wait that runs out of budget
    /// yields the retryable [`SessionError::NotReady`]. Only the request
    /// that created the session sees [`SessionError::Spawn`] when the
    /// launch fails; everyone else waiting on it gets `NotReady`.
    pub async fn request_session(&self, raw: &str) -> Result<ReadyArtifact> {
        let key = StreamKey::parse(raw)?;
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(SessionError::NotReady {
                key: key.to_string(),
            });
        }

        let source = self
            .shared
            .sources
            .resolve(&key)
            .ok_or_else(|| SessionError::NotConfigured(key.to_string()))?;

        let (session, is_new) = self
            .shared
            .registry
            .get_or_create(&key, || self.new_session(&key));
        if is_new {
            info!(key = %key, session = %session.id(), generation = session.generation(), "starting session");
            spawn_driver(self.shared.clone(), session.clone(), source);

            // Installed after `shutdown` took its snapshot; the driver
            // still owns cleanup and removal.
            if self.shared.shutting_down.load(Ordering::Acquire) {
                session.stop(StopReason::Shutdown);
                return Err(not_ready(&key));
            }
        }

        let started = Instant::now();
        let budget = self.shared.config.readiness_timeout;
        match session.readiness().wait_timeout(budget).await {
            WaitResult::Resolved(Ok(())) => {}
            WaitResult::Resolved(Err(ReadinessFailure::Spawn(msg)))
                if is_new =>
            {
                return Err(SessionError::Spawn(msg));
            }
            WaitResult::Resolved(Err(failure)) => {
                debug!(key = %key, reason = failure.message(), "session not available");
                return Err(not_ready(&key));
            }
            WaitResult::TimedOut => {
                debug!(key = %key, "readiness wait timed out");
                return Err(not_ready(&key));
            }
        }

        let remaining = budget.saturating_sub(started.elapsed());
        if !self.wait_for_playlist(&session, remaining).await {
            return Err(not_ready(&key));
        }
        if !session.touch() {
            return Err(not_ready(&key));
        }

        let paths = session.paths();
        Ok(ReadyArtifact {
            key,
            session_id: session.id(),
            generation: session.generation(),
            playlist: paths.playlist.clone(),
            output_dir: paths.output_dir.clone(),
        })
    }

    /// Refresh a ready session. Returns its paths, or `None` if there is
    /// no live session for the key.
    pub fn touch(&self, raw: &str) -> Result<Option<ResourcePaths>> {
        let key = StreamKey::parse(raw)?;
        Ok(self
            .shared
            .registry
            .get(&key)
            .filter(|session| session.touch())
            .map(|session| session.paths().clone()))
    }

    /// Paths of a live session. Unlike [`SessionSupervisor::touch`] this
    /// does not count as an access.
    pub fn paths(&self, raw: &str) -> Result<Option<ResourcePaths>> {
        let key = StreamKey::parse(raw)?;
        Ok(self
            .shared
            .registry
            .get(&key)
            .filter(|session| session.state().is_live())
            .map(|session| session.paths().clone()))
    }

    /// Operator-requested stop. Returns false if nothing was running.
    pub fn stop(&self, raw: &str) -> Result<bool> {
        let key = StreamKey::parse(raw)?;
        Ok(self
            .shared
            .registry
            .get(&key)
            .is_some_and(|session| session.stop(StopReason::Requested)))
    }

    pub fn status(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<_> = self
            .shared
            .registry
            .sessions()
            .iter()
            .map(|session| session.snapshot())
            .collect();
        sessions.sort_by(|a, b| a.key.cmp(&b.key));
        sessions
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    /// Stop every session and wait for their cleanup. New requests are
    /// refused from here on. Returns false if sessions were still draining
    /// when the shutdown timeout ran out.
    pub async fn shutdown(&self) -> bool {
        self.shared.shutting_down.store(true, Ordering::Release);

        let sessions = self.shared.registry.sessions();
        info!(count = sessions.len(), "shutting down sessions");
        for session in &sessions {
            session.stop(StopReason::Shutdown);
        }

        let deadline = Instant::now() + self.shared.config.shutdown_timeout;
        loop {
            let drained = self.shared.drained.notified();
            if self.shared.registry.is_empty() {
                info!("all sessions stopped");
                return true;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                warn!(
                    remaining = self.shared.registry.len(),
                    "shutdown timed out with sessions still running"
                );
                return false;
            }
        }
    }

    /// Remove output directories that belong to no current session, such
    /// as those left behind by a crash.
    pub async fn sweep_orphans(&self) -> std::io::Result<usize> {
        let registry = &self.shared.registry;
        self.shared
            .cleanup
            .sweep(|name| {
                StreamKey::parse(name)
                    .ok()
                    .and_then(|key| registry.get(&key))
                    .is_some()
            })
            .await
    }

    fn new_session(&self, key: &StreamKey) -> Session {
        let config = &self.shared.config;
        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        Session::new(
            key.clone(),
            generation,
            ResourcePaths::for_key(&config.output_root, key, &config.transcoder),
            SessionTimings {
                idle_timeout: config.idle_timeout,
                stop_grace: config.stop_grace,
            },
        )
    }

    /// Bridge the gap between the start confirmation and the first
    /// playlist write.
    async fn wait_for_playlist(&self, session: &Session, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        let interval = self.shared.config.artifact_poll_interval;
        loop {
            if session.paths().playlist.exists() {
                return true;
            }
            if session.state() != SessionState::Ready {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(key = %session.key(), "playlist not written within budget");
                return false;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

fn not_ready(key: &StreamKey) -> SessionError {
    SessionError::NotReady {
        key: key.to_string(),
    }
}

fn spawn_driver(shared: Arc<Shared>, session: Arc<Session>, source: SourceLocator) {
    let span = info_span!("session", key = %session.key(), generation = session.generation());
    tokio::spawn(
        async move {
            drive(&shared, &session, source).await;
            finalize(&shared, &session).await;
        }
        .instrument(span),
    );
}

/// Launch the transcoder and follow its events until it is gone.
async fn drive(shared: &Shared, session: &Arc<Session>, source: SourceLocator) {
    let invocation = TranscoderInvocation {
        key: session.key().clone(),
        source,
        paths: session.paths().clone(),
        policy: shared.config.transcoder.clone(),
    };

    match shared.launcher.launch(&invocation).await {
        Ok(handle) => follow(shared, session, handle).await,
        Err(e) => {
            let message = match e {
                SessionError::Spawn(msg) => msg,
                other => other.to_string(),
            };
            error!("failed to launch transcoder: {}", message);
            session.readiness().fail(ReadinessFailure::Spawn(message));
            session.process_exited(StopReason::SpawnFailed);
        }
    }
}

async fn follow(shared: &Shared, session: &Arc<Session>, mut handle: ProcessHandle) {
    if !session.attach_process(handle.controller()) {
        debug!("session stopped during launch, waiting for process exit");
    }

    let start_deadline = tokio::time::sleep(shared.config.start_timeout);
    tokio::pin!(start_deadline);
    let mut start_watch = true;

    loop {
        tokio::select! {
            event = handle.next_event() => {
                let Some(event) = event else {
                    session.process_exited(StopReason::ProcessEnded);
                    break;
                };
                let terminal = event.is_terminal();
                match event {
                    ProcessEvent::Started => {
                        start_watch = false;
                        session.mark_ready();
                    }
                    ProcessEvent::Progress(progress) => {
                        session.record_progress(progress);
                    }
                    ProcessEvent::Failed(msg) => {
                        let err = SessionError::RuntimeFailure(msg);
                        warn!("{}", err);
                        session.process_exited(StopReason::ProcessFailed);
                    }
                    ProcessEvent::Ended => {
                        session.process_exited(StopReason::ProcessEnded);
                    }
                }
                if terminal {
                    break;
                }
            }
            _ = &mut start_deadline, if start_watch => {
                start_watch = false;
                session.stop_if_starting(StopReason::StartTimeout);
            }
        }
    }
}

/// Runs once the process is confirmed gone.
async fn finalize(shared: &Shared, session: &Arc<Session>) {
    if let CleanupOutcome::Failed(reason) = shared.cleanup.cleanup(session.paths()).await {
        warn!("output left on disk: {}", reason);
    }
    session.finish();
    shared.registry.remove(session.key(), session);
    info!(reason = ?session.stop_reason(), "session stopped");
    shared.drained.notify_waiters();
}
