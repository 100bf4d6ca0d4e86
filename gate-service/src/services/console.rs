//! Per-console state for the HTTP surface.
//!
//! A console is one browser client, identified by an opaque cookie. Each keeps
//! its own session manager and local mirror, plus the protected view it last
//! mounted. Consoles that go quiet for a session TTL are logged out and
//! dropped by the sweeper.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::protect::ProtectedView;
use crate::services::mirror::{FileMirror, MemoryMirror, SessionMirror};
use crate::services::session::{generate_token, SessionManager, SessionSettings};
use crate::services::store::SessionStore;

pub const CONSOLE_COOKIE: &str = "gate_console";

pub struct ConsoleHost {
    id: String,
    sessions: Arc<SessionManager>,
    view: tokio::sync::Mutex<Option<Arc<ProtectedView>>>,
    last_seen: Mutex<Instant>,
}

impl ConsoleHost {
    fn new(id: String, sessions: Arc<SessionManager>) -> Self {
        Self {
            id,
            sessions,
            view: tokio::sync::Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub async fn view(&self) -> Option<Arc<ProtectedView>> {
        self.view.lock().await.clone()
    }

    /// Install a freshly mounted view, tearing down the previous one.
    pub async fn replace_view(&self, view: Arc<ProtectedView>) {
        let previous = self.view.lock().await.replace(view);
        if let Some(previous) = previous {
            previous.teardown();
        }
    }

    pub async fn unmount(&self) {
        if let Some(view) = self.view.lock().await.take() {
            view.teardown();
        }
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub struct ConsoleRegistry {
    hosts: DashMap<String, Arc<ConsoleHost>>,
    store: Arc<dyn SessionStore>,
    settings: SessionSettings,
    mirror_dir: Option<PathBuf>,
}

impl ConsoleRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        settings: SessionSettings,
        mirror_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            hosts: DashMap::new(),
            store,
            settings,
            mirror_dir,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ConsoleHost>> {
        let host = self.hosts.get(id).map(|host| host.value().clone())?;
        host.touch();
        Some(host)
    }

    /// Existing host for `id`, or a new console. The flag is true when created.
    pub fn get_or_create(&self, id: Option<&str>) -> (Arc<ConsoleHost>, bool) {
        let id = match id.filter(|id| is_console_id(id)) {
            Some(id) => id.to_string(),
            None => generate_token(),
        };

        let mut created = false;
        let host = self
            .hosts
            .entry(id.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(ConsoleHost::new(
                    id.clone(),
                    Arc::new(SessionManager::new(
                        self.store.clone(),
                        self.mirror_for(&id),
                        self.settings.clone(),
                    )),
                ))
            })
            .value()
            .clone();

        if created {
            tracing::debug!(console = %&id[..8], "Console registered");
        } else {
            host.touch();
        }
        (host, created)
    }

    /// Unregistered host for a request that carries no identity. Nothing about
    /// it outlives the request.
    pub fn transient(&self) -> Arc<ConsoleHost> {
        Arc::new(ConsoleHost::new(
            generate_token(),
            Arc::new(SessionManager::new(
                self.store.clone(),
                Arc::new(MemoryMirror::new()),
                self.settings.clone(),
            )),
        ))
    }

    /// Drop the console, tear down its view and log its session out.
    pub async fn remove(&self, id: &str) {
        if let Some((_, host)) = self.hosts.remove(id) {
            retire(&host).await;
        }
    }

    /// Retire every console idle for longer than `max_idle`. Returns how many went.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<String> = self
            .hosts
            .iter()
            .filter(|entry| entry.value().idle_for(now) > max_idle)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in idle {
            // Re-checked under the shard lock; the console may have been used since.
            if let Some((_, host)) = self
                .hosts
                .remove_if(&id, |_, host| host.idle_for(Instant::now()) > max_idle)
            {
                retire(&host).await;
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::info!(evicted, remaining = self.hosts.len(), "Idle consoles evicted");
        }
        evicted
    }

    /// Periodically evict consoles idle for longer than one session TTL.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let max_idle = self.settings.ttl.to_std().unwrap_or(every);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                registry.evict_idle(max_idle).await;
            }
        })
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn mirror_for(&self, id: &str) -> Arc<dyn SessionMirror> {
        match &self.mirror_dir {
            Some(dir) => Arc::new(FileMirror::new(dir.join(format!("{}.json", id)))),
            None => Arc::new(MemoryMirror::new()),
        }
    }
}

async fn retire(host: &ConsoleHost) {
    host.unmount().await;
    host.sessions.logout().await;
    tracing::debug!(console = %&host.id[..8], "Console retired");
}

/// Console ids double as mirror file names, so only generated tokens are accepted.
fn is_console_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| b.is_ascii_hexdigit())
}
