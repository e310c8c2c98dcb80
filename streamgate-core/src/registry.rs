use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use crate::key::StreamKey;
use crate::session::{Session, SessionState};

/// Authoritative map from stream key to its session.
///
/// `get_or_create` runs under the key's shard lock, so concurrent callers
/// for one key agree on a single winner while unrelated keys proceed in
/// parallel. Nothing here performs I/O or touches processes.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<StreamKey, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live session for `key`, installing one from `create` if
    /// there is none. The boolean is true only for the caller whose
    /// session was installed; that caller owns the start sequence.
    ///
    /// A `Stopped` entry that has not been removed yet is replaced. A
    /// `Stopping` entry is returned as-is: the key stays occupied until its
    /// cleanup completes.
    pub fn get_or_create(
        &self,
        key: &StreamKey,
        create: impl FnOnce() -> Session,
    ) -> (Arc<Session>, bool) {
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().state() == SessionState::Stopped {
                    let session = Arc::new(create());
                    entry.insert(session.clone());
                    (session, true)
                } else {
                    (entry.get().clone(), false)
                }
            }
            Entry::Vacant(entry) => {
                let session = Arc::new(create());
                entry.insert(session.clone());
                (session, true)
            }
        }
    }

    /// Remove `key` only if it still maps to this exact session.
    pub fn remove(&self, key: &StreamKey, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(key, |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    pub fn get(&self, key: &StreamKey) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscoderPolicy;
    use crate::paths::ResourcePaths;
    use crate::session::{SessionTimings, StopReason};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn make(key: &StreamKey, generation: u64) -> Session {
        Session::new(
            key.clone(),
            generation,
            ResourcePaths::for_key(
                Path::new("/tmp/streamgate-test"),
                key,
                &TranscoderPolicy::default(),
            ),
            SessionTimings {
                idle_timeout: Duration::from_secs(2),
                stop_grace: Duration::from_secs(1),
            },
        )
    }

    #[tokio::test]
    async fn concurrent_get_or_create_has_one_winner() {
        let registry = Arc::new(SessionRegistry::new());
        let key = StreamKey::parse("7").unwrap();
        let created = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                let key = key.clone();
                let created = created.clone();
                tokio::spawn(async move {
                    registry.get_or_create(&key, || {
                        created.fetch_add(1, Ordering::SeqCst);
                        make(&key, 1)
                    })
                })
            })
            .collect();

        let mut winners = 0;
        let mut ids = Vec::new();
        for task in tasks {
            let (session, is_new) = task.await.unwrap();
            winners += usize::from(is_new);
            ids.push(session.id());
        }

        assert_eq!(winners, 1);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn remove_ignores_replaced_sessions() {
        let registry = SessionRegistry::new();
        let key = StreamKey::parse("7").unwrap();

        let (old, _) = registry.get_or_create(&key, || make(&key, 1));
        old.stop(StopReason::Requested);
        old.finish();

        let (new, is_new) = registry.get_or_create(&key, || make(&key, 2));
        assert!(is_new);
        assert_ne!(old.id(), new.id());

        assert!(!registry.remove(&key, &old));
        assert_eq!(registry.get(&key).unwrap().id(), new.id());
        assert!(registry.remove(&key, &new));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn stopping_session_keeps_the_key() {
        let registry = SessionRegistry::new();
        let key = StreamKey::parse("7").unwrap();

        let (first, _) = registry.get_or_create(&key, || make(&key, 1));
        first.stop(StopReason::Idle);

        let (again, is_new) = registry.get_or_create(&key, || make(&key, 2));
        assert!(!is_new);
        assert_eq!(again.id(), first.id());
        assert_eq!(registry.len(), 1);
    }
}
