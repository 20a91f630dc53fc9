use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::StatusCache;
use crate::config::Identity;
use crate::remote::{PublishRecord, StatusStore};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MANUAL_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualTrigger {
    Pushed,
    /// Sharing is off: the cache was refreshed but nothing was published.
    NotShared,
    /// Still inside the cooldown window; nothing happened.
    CoolingDown,
}

// ─── Sync Scheduler ─────────────────────────────────────────────────
//
// Two independent axes:
//   periodic: idle <-> running, one push on enable then every `interval`
//   manual:   ready -> cooling -> ready, one push per window
//
// A periodic task remembers the generation it was started under and stops
// as soon as the flag is off or the generation moved on, so a tick that was
// already due when `disable` ran never publishes.

pub struct SyncScheduler {
    store: Arc<dyn StatusStore>,
    cache: Arc<StatusCache>,
    identity: Arc<Mutex<Identity>>,
    interval: Duration,
    cooldown: Duration,

    enabled: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    periodic: Option<JoinHandle<()>>,

    cooling: Arc<AtomicBool>,
    cooldown_timer: Option<JoinHandle<()>>,
    update_button: Arc<watch::Sender<bool>>,
}

impl SyncScheduler {
    pub fn new(
        store: Arc<dyn StatusStore>,
        cache: Arc<StatusCache>,
        identity: Arc<Mutex<Identity>>,
        interval: Duration,
        cooldown: Duration,
    ) -> Self {
        let (update_button, _) = watch::channel(true);
        Self {
            store,
            cache,
            identity,
            interval,
            cooldown,
            enabled: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            periodic: None,
            cooling: Arc::new(AtomicBool::new(false)),
            cooldown_timer: None,
            update_button: Arc::new(update_button),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.periodic.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn is_cooling(&self) -> bool {
        self.cooling.load(Ordering::SeqCst)
    }

    /// Whether the manual update affordance should accept clicks.
    pub fn update_button(&self) -> watch::Receiver<bool> {
        self.update_button.subscribe()
    }

    /// Start publishing: one push now, then one per interval.
    pub fn enable(&mut self) {
        if self.is_enabled() && self.is_running() {
            return;
        }
        self.stop_periodic();
        self.enabled.store(true, Ordering::SeqCst);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Status sync enabled (every {})",
            humantime::format_duration(self.interval)
        );

        let store = Arc::clone(&self.store);
        let identity = Arc::clone(&self.identity);
        let enabled = Arc::clone(&self.enabled);
        let current = Arc::clone(&self.generation);
        let interval = self.interval;

        self.periodic = Some(tokio::spawn(async move {
            let live = || {
                enabled.load(Ordering::SeqCst) && current.load(Ordering::SeqCst) == generation
            };
            push_identity(store.as_ref(), &identity, "initial").await;

            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !live() {
                    debug!("periodic sync generation {} retired", generation);
                    break;
                }
                push_identity(store.as_ref(), &identity, "periodic").await;
            }
        }));
    }

    /// Stop publishing. Idempotent.
    pub fn disable(&mut self) {
        let was_enabled = self.enabled.swap(false, Ordering::SeqCst);
        self.stop_periodic();
        if was_enabled {
            info!("Status sync disabled");
        }
    }

    /// Manual "Update Status": push now, refresh the cache, then cool down.
    pub async fn trigger_manual(&mut self) -> ManualTrigger {
        if self.is_cooling() {
            debug!("manual update rejected, cooling down");
            return ManualTrigger::CoolingDown;
        }

        self.cooling.store(true, Ordering::SeqCst);
        self.update_button.send_replace(false);
        let cooling = Arc::clone(&self.cooling);
        let button = Arc::clone(&self.update_button);
        let cooldown = self.cooldown;
        if let Some(old) = self.cooldown_timer.replace(tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            cooling.store(false, Ordering::SeqCst);
            button.send_replace(true);
        })) {
            old.abort();
        }

        self.cache.clear();
        if !self.is_enabled() {
            return ManualTrigger::NotShared;
        }
        push_identity(self.store.as_ref(), &self.identity, "manual").await;
        ManualTrigger::Pushed
    }

    /// Tear down both timers and re-enable the update affordance.
    pub fn shutdown(&mut self) {
        self.disable();
        if let Some(timer) = self.cooldown_timer.take() {
            timer.abort();
        }
        self.cooling.store(false, Ordering::SeqCst);
        self.update_button.send_replace(true);
    }

    fn stop_periodic(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.periodic.take() {
            handle.abort();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Publish the current identity. Failures are logged; the next tick or
/// manual update is the retry.
pub async fn push_identity(store: &dyn StatusStore, identity: &Mutex<Identity>, reason: &str) {
    let record = PublishRecord::from(&*identity.lock());
    match store.push(&record).await {
        Ok(()) => debug!("{} status push for {} ok", reason, record.username),
        Err(e) => warn!("{} status push for {} failed: {}", reason, record.username, e),
    }
}
