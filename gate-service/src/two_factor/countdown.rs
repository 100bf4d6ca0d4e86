use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Runs when the countdown reaches zero, before it starts over.
pub type ExpiryHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Repeating per-second countdown published on a watch channel.
pub struct Countdown {
    period_secs: u64,
    remaining: Arc<watch::Sender<u64>>,
    hook: Mutex<Option<ExpiryHook>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Countdown {
    pub fn new(period_secs: u64) -> Self {
        let (remaining, _) = watch::channel(period_secs);
        Self {
            period_secs,
            remaining: Arc::new(remaining),
            hook: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn start(&self, on_expired: ExpiryHook) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(on_expired);
        self.restart();
    }

    /// Reset to the full period. No-op before `start`.
    pub fn restart(&self) {
        let Some(hook) = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return;
        };

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let remaining = self.remaining.clone();
        let period = self.period_secs;
        remaining.send_replace(period);
        *task = Some(tokio::spawn(async move {
            loop {
                for left in (0..period).rev() {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    remaining.send_replace(left);
                }
                hook().await;
                remaining.send_replace(period);
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn remaining(&self) -> u64 {
        *self.remaining.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.remaining.subscribe()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}
