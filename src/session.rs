use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::cache::StatusCache;
use crate::config::{AppConfig, Identity};
use crate::dom::{Document, NodeId};
use crate::lookup::StatusLookup;
use crate::remote::StatusStore;
use crate::rules::{self, MenuRules, TradeOutcome};
use crate::sync::{push_identity, ManualTrigger, SyncScheduler};
use crate::watcher::DomWatcher;

// ─── Session ────────────────────────────────────────────────────────
//
// Owns every piece of runtime state: cache, scheduler, watchers and the
// in-flight icon lookups. Nothing is global, so independent sessions can
// run side by side.

pub struct Session {
    config: AppConfig,
    live_username: Option<String>,
    identity: Arc<Mutex<Identity>>,
    sharing: Arc<AtomicBool>,

    store: Arc<dyn StatusStore>,
    cache: Arc<StatusCache>,
    lookup: StatusLookup,
    scheduler: SyncScheduler,

    document: Arc<Mutex<Document>>,
    chat_watcher: Option<DomWatcher>,
    menu_watcher: Option<DomWatcher>,
    lookups: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn StatusStore>,
        document: Arc<Mutex<Document>>,
    ) -> Self {
        let cache = Arc::new(StatusCache::new(config.cache_ttl()));
        let identity = Arc::new(Mutex::new(config.identity()));
        let lookup = StatusLookup::new(Arc::clone(&cache), Arc::clone(&store));
        let scheduler = SyncScheduler::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&identity),
            config.sync_interval(),
            config.manual_cooldown(),
        );
        Self {
            sharing: Arc::new(AtomicBool::new(config.show_status_icons)),
            config,
            live_username: None,
            identity,
            store,
            cache,
            lookup,
            scheduler,
            document,
            chat_watcher: None,
            menu_watcher: None,
            lookups: Vec::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn identity(&self) -> Identity {
        self.identity.lock().clone()
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn is_started(&self) -> bool {
        self.chat_watcher.is_some()
    }

    pub fn start(&mut self) {
        if self.is_started() {
            return;
        }
        let retry = self.config.root_retry();
        self.chat_watcher = Some(DomWatcher::watch(
            "chat",
            rules::CHAT_ROOT,
            Box::new(rules::is_chat_message),
            retry,
        ));
        self.menu_watcher = Some(DomWatcher::watch(
            "context-menu",
            rules::MENU_ROOT,
            Box::new(rules::is_menu_item),
            retry,
        ));
        if self.config.show_status_icons {
            self.scheduler.enable();
        }
        info!("IronMode started");
    }

    pub fn stop(&mut self) {
        {
            let mut doc = self.document.lock();
            for mut watcher in [self.chat_watcher.take(), self.menu_watcher.take()]
                .into_iter()
                .flatten()
            {
                watcher.stop(&mut doc);
            }
        }
        self.scheduler.shutdown();
        for task in self.lookups.drain(..) {
            task.abort();
        }
        info!("IronMode stopped");
    }

    /// Process whatever the host inserted since the last call.
    pub fn tick(&mut self) {
        self.lookups.retain(|t| !t.is_finished());

        let iron = self.config.is_iron;
        let sharing = self.sharing.load(Ordering::SeqCst);
        let group_names = self.config.group_names.clone();
        let menu_rules = MenuRules {
            block_trades: iron,
            block_bank: iron && self.config.is_ultimate,
            group_names: &group_names,
        };

        let mut to_resolve: Vec<NodeId> = Vec::new();
        {
            let mut doc = self.document.lock();
            if let Some(watcher) = self.chat_watcher.as_mut() {
                watcher.pump(&mut doc, |doc, message| {
                    if iron {
                        match rules::intercept_trade(doc, message, &group_names) {
                            Ok(TradeOutcome::Rebuffed { .. }) => return,
                            Ok(_) => {}
                            Err(e) => debug!("trade check on {} failed: {}", message, e),
                        }
                    }
                    if sharing {
                        to_resolve.push(message);
                    }
                });
            }
            if let Some(watcher) = self.menu_watcher.as_mut() {
                watcher.pump(&mut doc, |doc, item| {
                    if let Err(e) = rules::filter_menu_item(doc, item, menu_rules) {
                        debug!("menu item {} skipped: {}", item, e);
                    }
                });
            }
        }

        for message in to_resolve {
            let document = Arc::clone(&self.document);
            let lookup = self.lookup.clone();
            let sharing = Arc::clone(&self.sharing);
            self.lookups.push(tokio::spawn(async move {
                rules::augment_message(&document, &lookup, &sharing, message).await;
            }));
        }
    }

    /// Name reported by the running game client; wins over the configured one.
    pub fn set_local_username(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() || self.live_username.as_deref() == Some(name) {
            return;
        }
        self.live_username = Some(name.to_string());
        self.refresh_identity();
    }

    fn refresh_identity(&mut self) -> bool {
        let mut next = self.config.identity();
        if let Some(name) = &self.live_username {
            next.username = name.clone();
        }
        let mut current = self.identity.lock();
        if *current == next {
            return false;
        }
        *current = next;
        true
    }

    /// Adopt edited settings and carry out the side effects of each transition.
    pub async fn apply_settings(&mut self, mut next: AppConfig) {
        if next.uuid.trim().is_empty() {
            next.uuid = self.config.uuid.clone();
        }
        next.has_died |= self.config.has_died;

        let previous = std::mem::replace(&mut self.config, next);
        let before = self.identity();
        let changed = self.refresh_identity();

        let was_sharing = previous.show_status_icons;
        let sharing = self.config.show_status_icons;
        self.sharing.store(sharing, Ordering::SeqCst);

        let left_iron = previous.is_iron && !self.config.is_iron;
        if left_iron {
            info!("Iron mode turned off");
            self.cache.clear();
        }

        match (was_sharing, sharing) {
            (false, true) => self.scheduler.enable(),
            (true, false) => {
                self.scheduler.disable();
                self.retract(&before).await;
            }
            (true, true) if left_iron => self.retract(&self.identity()).await,
            (true, true) if changed => {
                push_identity(self.store.as_ref(), &self.identity, "settings").await;
            }
            _ => {}
        }
    }

    async fn retract(&self, identity: &Identity) {
        match self.store.clear(identity).await {
            Ok(()) => info!("Retracted published status for {}", identity.username),
            Err(e) => warn!("Failed to retract status for {}: {}", identity.username, e),
        }
    }

    /// "Update Status" button.
    pub async fn trigger_manual_update(&mut self) -> ManualTrigger {
        self.scheduler.trigger_manual().await
    }

    /// The local hardcore character died: hardcore is gone for good.
    pub async fn record_death(&mut self) -> bool {
        if !self.config.is_hardcore || self.config.has_died {
            return false;
        }
        self.config.has_died = true;
        self.refresh_identity();
        info!("Hardcore status lost");
        if self.sharing.load(Ordering::SeqCst) {
            push_identity(self.store.as_ref(), &self.identity, "death").await;
        }
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in self.lookups.drain(..) {
            task.abort();
        }
    }
}
