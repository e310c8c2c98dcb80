use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::key::StreamKey;
use crate::paths::ResourcePaths;
use crate::process::{ProcessController, ProgressSnapshot};
use crate::readiness::{Readiness, ReadinessFailure};

/// Lifecycle of one session.
///
/// `Starting → Ready → Stopping → Stopped`, with `Starting → Stopping` for
/// early failure. Nothing leaves `Stopping` except towards `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Ready,
    Stopping,
    Stopped,
}

impl SessionState {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Ready)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    Idle,
    StartTimeout,
    SpawnFailed,
    ProcessFailed,
    ProcessEnded,
    Requested,
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Idle => "idle",
            StopReason::StartTimeout => "start-timeout",
            StopReason::SpawnFailed => "spawn-failed",
            StopReason::ProcessFailed => "process-failed",
            StopReason::ProcessEnded => "process-ended",
            StopReason::Requested => "requested",
            StopReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// Timing policy copied into every session at creation.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub idle_timeout: Duration,
    pub stop_grace: Duration,
}

#[derive(Debug)]
struct IdleTimer {
    epoch: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    last_access: Instant,
    process: Option<ProcessController>,
    idle_timer: Option<IdleTimer>,
    timer_epoch: u64,
    stop_reason: Option<StopReason>,
    last_progress: Option<ProgressSnapshot>,
}

/// One supervised on-demand conversion for one stream key.
///
/// All mutable state sits behind a single mutex that is never held across
/// an await point, which makes `touch`, `stop` and timer expiry resolve in
/// a well-defined order.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    generation: u64,
    key: StreamKey,
    created_at: Instant,
    paths: ResourcePaths,
    readiness: Readiness,
    timings: SessionTimings,
    inner: Mutex<SessionInner>,
}

/// Serializable view of a session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub key: StreamKey,
    pub id: Uuid,
    pub generation: u64,
    pub state: SessionState,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub idle_deadline_ms: Option<u64>,
    pub pid: Option<u32>,
    pub stop_reason: Option<StopReason>,
    pub progress: Option<ProgressSnapshot>,
}

impl Session {
    pub fn new(
        key: StreamKey,
        generation: u64,
        paths: ResourcePaths,
        timings: SessionTimings,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::now_v7(),
            generation,
            key,
            created_at: now,
            paths,
            readiness: Readiness::new(),
            timings,
            inner: Mutex::new(SessionInner {
                state: SessionState::Starting,
                last_access: now,
                process: None,
                idle_timer: None,
                timer_epoch: 0,
                stop_reason: None,
                last_progress: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn paths(&self) -> &ResourcePaths {
        &self.paths
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn last_access(&self) -> Instant {
        self.inner.lock().last_access
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner.lock().stop_reason
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().process.as_ref().and_then(|p| p.pid())
    }

    /// When the armed idle timer will fire, if one is armed.
    pub fn idle_deadline(&self) -> Option<Instant> {
        self.inner.lock().idle_timer.as_ref().map(|t| t.deadline)
    }

    /// Record an access. Rearms the idle timer once the session is ready;
    /// returns false if the session is already stopping.
    pub fn touch(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Starting => {
                inner.last_access = inner.last_access.max(Instant::now());
                true
            }
            SessionState::Ready => {
                inner.last_access = inner.last_access.max(Instant::now());
                self.rearm_locked(&mut inner);
                debug!(key = %self.key, "session touched");
                true
            }
            SessionState::Stopping | SessionState::Stopped => false,
        }
    }

    /// Attach the launched process. If a stop was requested while the
    /// launch was in flight, the process is told to terminate right away
    /// and false is returned.
    pub fn attach_process(&self, controller: ProcessController) -> bool {
        let mut inner = self.inner.lock();
        inner.process = Some(controller.clone());
        if inner.state.is_live() {
            return true;
        }

        drop(inner);
        self.signal_termination(controller);
        false
    }

    /// `Starting → Ready` on the process start confirmation. Arms the idle
    /// timer and releases readiness waiters.
    pub fn mark_ready(self: &Arc<Self>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Starting {
                return false;
            }
            inner.state = SessionState::Ready;
            inner.last_access = Instant::now();
            self.rearm_locked(&mut inner);
        }

        self.readiness.succeed();
        info!(key = %self.key, session = %self.id, "session ready");
        true
    }

    pub fn record_progress(&self, progress: ProgressSnapshot) {
        self.inner.lock().last_progress = Some(progress);
    }

    /// Begin stopping. Idempotent: returns false if the session was already
    /// stopping or stopped.
    pub fn stop(&self, reason: StopReason) -> bool {
        let controller = {
            let mut inner = self.inner.lock();
            if !inner.state.is_live() {
                return false;
            }
            self.begin_stop_locked(&mut inner, reason)
        };

        info!(key = %self.key, session = %self.id, %reason, "stopping session");
        if let Some(controller) = controller {
            self.signal_termination(controller);
        }
        true
    }

    /// Stop only if the session never got past `Starting`.
    pub fn stop_if_starting(&self, reason: StopReason) -> bool {
        let controller = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Starting {
                return false;
            }
            self.begin_stop_locked(&mut inner, reason)
        };

        warn!(key = %self.key, session = %self.id, %reason, "session did not start in time");
        if let Some(controller) = controller {
            self.signal_termination(controller);
        }
        true
    }

    /// The process is gone on its own. Moves a live session to `Stopping`
    /// without signalling anything.
    pub fn process_exited(&self, reason: StopReason) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.is_live() {
            return false;
        }
        self.begin_stop_locked(&mut inner, reason);
        true
    }

    /// Terminal transition, after the process is confirmed gone and cleanup
    /// has run.
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        if let Some(timer) = inner.idle_timer.take() {
            timer.task.abort();
        }
        inner.process = None;
        inner.state = SessionState::Stopped;
        drop(inner);

        self.readiness.fail(ReadinessFailure::Aborted(
            "session stopped".to_string(),
        ));
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = Instant::now();
        let inner = self.inner.lock();
        SessionSnapshot {
            key: self.key.clone(),
            id: self.id,
            generation: self.generation,
            state: inner.state,
            age_ms: millis(now.saturating_duration_since(self.created_at)),
            idle_ms: millis(now.saturating_duration_since(inner.last_access)),
            idle_deadline_ms: inner
                .idle_timer
                .as_ref()
                .map(|t| millis(t.deadline.saturating_duration_since(now))),
            pid: inner.process.as_ref().and_then(|p| p.pid()),
            stop_reason: inner.stop_reason,
            progress: inner.last_progress.clone(),
        }
    }

    fn begin_stop_locked(
        &self,
        inner: &mut SessionInner,
        reason: StopReason,
    ) -> Option<ProcessController> {
        inner.state = SessionState::Stopping;
        inner.stop_reason = Some(reason);
        if let Some(timer) = inner.idle_timer.take() {
            timer.task.abort();
        }
        self.readiness
            .fail(ReadinessFailure::Aborted(format!("session {reason}")));
        inner.process.clone()
    }

    /// Graceful stop first, forced kill once the grace period runs out.
    fn signal_termination(&self, controller: ProcessController) {
        if !controller.terminate() {
            return;
        }

        let grace = self.timings.stop_grace;
        let key = self.key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !controller.is_closed() {
                warn!(key = %key, "transcoder ignored stop request, killing");
                controller.kill();
            }
        });
    }

    /// Cancel the armed timer and arm a new one for
    /// `last_access + idle_timeout`. Caller holds the lock.
    fn rearm_locked(self: &Arc<Self>, inner: &mut SessionInner) {
        if let Some(timer) = inner.idle_timer.take() {
            timer.task.abort();
        }

        inner.timer_epoch += 1;
        let epoch = inner.timer_epoch;
        let deadline = inner.last_access + self.timings.idle_timeout;
        let session = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            expire(session, epoch);
        });

        inner.idle_timer = Some(IdleTimer {
            epoch,
            deadline,
            task,
        });
    }
}

/// Idle timer body. Only the timer whose epoch is still current may stop
/// the session; a timer that lost a race with `touch` does nothing.
fn expire(session: Weak<Session>, epoch: u64) {
    let Some(session) = session.upgrade() else {
        return;
    };

    let controller = {
        let mut inner = session.inner.lock();
        let current = inner
            .idle_timer
            .as_ref()
            .is_some_and(|timer| timer.epoch == epoch);
        if !current || inner.state != SessionState::Ready {
            return;
        }
        // Detach rather than abort: this is the running timer task.
        drop(inner.idle_timer.take());
        session.begin_stop_locked(&mut inner, StopReason::Idle)
    };

    info!(key = %session.key, session = %session.id, "session idle, stopping");
    if let Some(controller) = controller {
        session.signal_termination(controller);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscoderPolicy;
    use crate::process::{ProcessHandle, ProcessSignal};
    use std::path::Path;

    fn session(idle_ms: u64) -> Arc<Session> {
        let key = StreamKey::parse("7").unwrap();
        let paths = ResourcePaths::for_key(
            Path::new("/tmp/streamgate-test"),
            &key,
            &TranscoderPolicy::default(),
        );
        Arc::new(Session::new(
            key,
            1,
            paths,
            SessionTimings {
                idle_timeout: Duration::from_millis(idle_ms),
                stop_grace: Duration::from_millis(500),
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn starting_touch_does_not_arm_timer() {
        let session = session(2000);
        assert!(session.touch());
        assert!(session.idle_deadline().is_none());
        assert_eq!(session.state(), SessionState::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_arms_timer_and_idle_expiry_stops() {
        let session = session(2000);
        let (handle, mut driver) = ProcessHandle::pair(Some(1));
        assert!(session.attach_process(handle.controller()));
        assert!(session.mark_ready());

        let deadline = session.idle_deadline().unwrap();
        assert_eq!(deadline - session.last_access(), Duration::from_millis(2000));

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(session.state(), SessionState::Ready);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(session.state(), SessionState::Stopping);
        assert_eq!(session.stop_reason(), Some(StopReason::Idle));
        assert_eq!(driver.next_signal().await, Some(ProcessSignal::Terminate));
    }

    #[tokio::test(start_paused = true)]
    async fn touch_replaces_the_armed_timer() {
        let session = session(2000);
        assert!(session.mark_ready());
        let first = session.idle_deadline().unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(session.touch());
        let second = session.idle_deadline().unwrap();
        assert!(second - first >= Duration::from_millis(1500));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(session.state(), SessionState::Ready);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(session.state(), SessionState::Stopping);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_epoch_cannot_stop_session() {
        let session = session(2000);
        assert!(session.mark_ready());
        let stale = session.inner.lock().timer_epoch;
        assert!(session.touch());

        expire(Arc::downgrade(&session), stale);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_fails_readiness() {
        let session = session(2000);
        assert!(session.stop(StopReason::Requested));
        assert!(!session.stop(StopReason::Shutdown));
        assert!(!session.touch());
        assert!(!session.mark_ready());
        assert_eq!(session.stop_reason(), Some(StopReason::Requested));
        assert!(matches!(
            session.readiness().outcome(),
            Some(Err(ReadinessFailure::Aborted(_)))
        ));

        session.finish();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!session.stop(StopReason::Requested));
    }

    #[tokio::test(start_paused = true)]
    async fn kill_follows_ignored_terminate() {
        let session = session(2000);
        let (handle, mut driver) = ProcessHandle::pair(Some(9));
        session.attach_process(handle.controller());
        assert!(session.mark_ready());

        assert!(session.stop(StopReason::Requested));
        assert_eq!(driver.next_signal().await, Some(ProcessSignal::Terminate));
        assert_eq!(driver.next_signal().await, Some(ProcessSignal::Kill));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_serializes_for_status() {
        let session = session(2000);
        assert!(session.mark_ready());
        tokio::time::sleep(Duration::from_millis(500)).await;

        let value = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(value["key"], "7");
        assert_eq!(value["state"], "ready");
        assert_eq!(value["idle_ms"], 500);
        assert_eq!(value["idle_deadline_ms"], 1500);

        session.stop(StopReason::StartTimeout);
        let value = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(value["stop_reason"], "start-timeout");
        assert!(value["idle_deadline_ms"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn process_attached_after_stop_is_terminated() {
        let session = session(2000);
        assert!(session.stop(StopReason::Shutdown));

        let (handle, mut driver) = ProcessHandle::pair(Some(3));
        assert!(!session.attach_process(handle.controller()));
        assert_eq!(driver.next_signal().await, Some(ProcessSignal::Terminate));
    }
}
