use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// TTL settings for the session registry. Defaults: sessions expire after
/// an hour of inactivity, checked every fifteen minutes.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Clone)]
struct SessionState {
    user: Option<String>,
    impersonating: Option<String>,
    last_activity: Instant,
}

/// Handle to the background session evictor.
pub struct SessionEvictor {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl SessionEvictor {
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Thread-safe MCP session map keyed by session id. Constructed at daemon
/// startup and passed to handlers; the evictor task is started and
/// stopped explicitly rather than living as a global.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionState>>>,
    settings: SessionSettings,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            settings,
        }
    }

    /// Record activity on a session, creating it on first sight.
    pub fn touch(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("session registry poisoned");
        sessions
            .entry(session_id.to_string())
            .and_modify(|state| state.last_activity = Instant::now())
            .or_insert_with(|| SessionState {
                user: None,
                impersonating: None,
                last_activity: Instant::now(),
            });
    }

    pub fn set_identity(&self, session_id: &str, user: Option<String>, impersonating: Option<String>) {
        let mut sessions = self.sessions.lock().expect("session registry poisoned");
        let state = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState {
                user: None,
                impersonating: None,
                last_activity: Instant::now(),
            });
        state.user = user;
        state.impersonating = impersonating;
        state.last_activity = Instant::now();
    }

    /// The identity queries should be evaluated as: the impersonation
    /// target when set, otherwise the authenticated user.
    #[must_use]
    pub fn effective_user(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.lock().expect("session registry poisoned");
        let state = sessions.get(session_id)?;
        state.impersonating.clone().or_else(|| state.user.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session registry poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions idle past the TTL; returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().expect("session registry poisoned");
        let ttl = self.settings.ttl;
        let before = sessions.len();
        sessions.retain(|_, state| state.last_activity.elapsed() <= ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            log::info!("Evicted {evicted} expired MCP sessions");
        }
        evicted
    }

    /// Spawn the periodic eviction task.
    #[must_use]
    pub fn start_evictor(&self) -> SessionEvictor {
        let registry = self.clone();
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();
        let interval = self.settings.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel_task.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.evict_expired();
                    }
                }
            }
        });
        SessionEvictor { cancel, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry_with_ttl(ttl: Duration) -> SessionRegistry {
        SessionRegistry::new(SessionSettings {
            ttl,
            cleanup_interval: Duration::from_secs(900),
        })
    }

    #[test]
    fn touch_creates_and_refreshes() {
        let registry = registry_with_ttl(Duration::from_secs(60));
        registry.touch("s1");
        registry.touch("s1");
        registry.touch("s2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn impersonation_wins_over_authenticated_user() {
        let registry = registry_with_ttl(Duration::from_secs(60));
        registry.set_identity("s1", Some("alice".to_string()), None);
        assert_eq!(registry.effective_user("s1"), Some("alice".to_string()));

        registry.set_identity(
            "s1",
            Some("alice".to_string()),
            Some("service-account".to_string()),
        );
        assert_eq!(
            registry.effective_user("s1"),
            Some("service-account".to_string())
        );
        assert_eq!(registry.effective_user("missing"), None);
    }

    #[test]
    fn expired_sessions_are_evicted() {
        let registry = registry_with_ttl(Duration::from_millis(0));
        registry.touch("old");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.evict_expired(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn live_sessions_survive_eviction() {
        let registry = registry_with_ttl(Duration::from_secs(60));
        registry.touch("live");
        assert_eq!(registry.evict_expired(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn evictor_starts_and_stops() {
        let registry = registry_with_ttl(Duration::from_secs(60));
        let evictor = registry.start_evictor();
        evictor.stop().await;
    }
}
