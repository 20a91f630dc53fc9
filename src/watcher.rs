use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, trace};
use tokio::time::Instant;

use crate::dom::{Document, NodeId, ObserverId, Selector};

pub const DEFAULT_ROOT_RETRY: Duration = Duration::from_secs(1);

pub type Predicate = Box<dyn Fn(&Document, NodeId) -> bool + Send + Sync>;

enum WatchState {
    /// Root not mounted yet; look again at `next_attempt`.
    Acquiring { next_attempt: Instant },
    Observing { root: NodeId, observer: ObserverId },
    Stopped,
}

// ─── DOM Watcher ────────────────────────────────────────────────────
//
// Poll-driven: the host calls `poll` from its frame loop. Until the root
// exists it retries on a fixed delay. On attach it sweeps the existing
// subtree once, then only looks at queued insertions. Each inserted node is
// tested itself and has its descendants scanned, since a wrapper can arrive
// with the target nested inside. A node reported twice in one batch is
// dispatched once; across batches handlers rely on their own marker.

pub struct DomWatcher {
    name: &'static str,
    root_selector: Selector,
    predicate: Predicate,
    retry: Duration,
    state: WatchState,
}

impl DomWatcher {
    pub fn watch(
        name: &'static str,
        root_selector: &str,
        predicate: Predicate,
        retry: Duration,
    ) -> Self {
        Self {
            name,
            root_selector: Selector::parse(root_selector),
            predicate,
            retry,
            state: WatchState::Acquiring {
                next_attempt: Instant::now(),
            },
        }
    }

    pub fn is_observing(&self) -> bool {
        matches!(self.state, WatchState::Observing { .. })
    }

    /// Collect every new match since the last poll.
    pub fn poll(&mut self, doc: &mut Document) -> Vec<NodeId> {
        match self.state {
            WatchState::Stopped => Vec::new(),
            WatchState::Acquiring { next_attempt } => {
                if Instant::now() < next_attempt {
                    return Vec::new();
                }
                let Some(root) = doc.query(&self.root_selector) else {
                    trace!("{}: root {:?} not mounted yet", self.name, self.root_selector);
                    self.state = WatchState::Acquiring {
                        next_attempt: Instant::now() + self.retry,
                    };
                    return Vec::new();
                };
                let observer = doc.observe(root);
                self.state = WatchState::Observing { root, observer };
                let existing: Vec<NodeId> = doc
                    .descendants(root)
                    .into_iter()
                    .filter(|&n| (self.predicate)(&*doc, n))
                    .collect();
                info!(
                    "{}: attached to root {}, {} existing matches",
                    self.name,
                    root,
                    existing.len()
                );
                existing
            }
            WatchState::Observing { root, observer } => {
                if !doc.is_connected(root) {
                    debug!("{}: root {} was unmounted, reacquiring", self.name, root);
                    doc.disconnect(observer);
                    self.state = WatchState::Acquiring {
                        next_attempt: Instant::now(),
                    };
                    return self.poll(doc);
                }
                let records = doc.take_records(observer);
                let mut seen = HashSet::new();
                let mut matched = Vec::new();
                for inserted in records {
                    if !doc.is_connected(inserted) {
                        continue;
                    }
                    let candidates =
                        std::iter::once(inserted).chain(doc.descendants(inserted));
                    for node in candidates {
                        if (self.predicate)(doc, node) && seen.insert(node) {
                            matched.push(node);
                        }
                    }
                }
                if !matched.is_empty() {
                    trace!("{}: {} new matches", self.name, matched.len());
                }
                matched
            }
        }
    }

    /// Poll and hand each match to `on_match`.
    pub fn pump<F>(&mut self, doc: &mut Document, mut on_match: F) -> usize
    where
        F: FnMut(&mut Document, NodeId),
    {
        let matched = self.poll(doc);
        for &node in &matched {
            on_match(doc, node);
        }
        matched.len()
    }

    pub fn stop(&mut self, doc: &mut Document) {
        if let WatchState::Observing { observer, .. } = self.state {
            doc.disconnect(observer);
            debug!("{}: disconnected", self.name);
        }
        self.state = WatchState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn class_watcher(class: &'static str) -> DomWatcher {
        DomWatcher::watch(
            "test",
            "#root",
            Box::new(move |doc: &Document, n: NodeId| doc.has_class(n, class)),
            DEFAULT_ROOT_RETRY,
        )
    }

    fn el(doc: &mut Document, class: &str) -> NodeId {
        let n = doc.create_element("div");
        doc.add_class(n, class).unwrap();
        n
    }

    fn mount_root(doc: &mut Document) -> NodeId {
        let root = doc.create_element("div");
        doc.set_id(root, "root").unwrap();
        let body = doc.body();
        doc.append_child(body, root).unwrap();
        root
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_root_appears() {
        let mut doc = Document::new();
        let mut watcher = class_watcher("hit");
        assert!(watcher.poll(&mut doc).is_empty());
        assert!(!watcher.is_observing());

        let root = mount_root(&mut doc);
        let existing = el(&mut doc, "hit");
        doc.append_child(root, existing).unwrap();

        // Retry delay has not elapsed.
        assert!(watcher.poll(&mut doc).is_empty());
        assert!(!watcher.is_observing());

        tokio::time::advance(DEFAULT_ROOT_RETRY).await;
        assert_eq!(watcher.poll(&mut doc), vec![existing]);
        assert!(watcher.is_observing());
    }

    #[tokio::test]
    async fn finds_nested_matches_in_inserted_subtree() {
        let mut doc = Document::new();
        let root = mount_root(&mut doc);
        let mut watcher = class_watcher("hit");
        assert!(watcher.poll(&mut doc).is_empty());

        let wrapper = el(&mut doc, "wrapper");
        let mid = el(&mut doc, "mid");
        let deep = el(&mut doc, "hit");
        doc.append_child(mid, deep).unwrap();
        doc.append_child(wrapper, mid).unwrap();
        doc.append_child(root, wrapper).unwrap();

        let direct = el(&mut doc, "hit");
        doc.append_child(root, direct).unwrap();

        assert_eq!(watcher.poll(&mut doc), vec![deep, direct]);
        assert!(watcher.poll(&mut doc).is_empty());
    }

    #[tokio::test]
    async fn node_reported_twice_in_a_batch_dispatches_once() {
        let mut doc = Document::new();
        let root = mount_root(&mut doc);
        let mut watcher = class_watcher("hit");
        watcher.poll(&mut doc);

        let wrapper = el(&mut doc, "wrapper");
        doc.append_child(root, wrapper).unwrap();
        let target = el(&mut doc, "hit");
        doc.append_child(wrapper, target).unwrap();

        let mut dispatched = Vec::new();
        let n = watcher.pump(&mut doc, |_, node| dispatched.push(node));
        assert_eq!(n, 1);
        assert_eq!(dispatched, vec![target]);
    }

    #[tokio::test]
    async fn skips_nodes_removed_before_poll() {
        let mut doc = Document::new();
        let root = mount_root(&mut doc);
        let mut watcher = class_watcher("hit");
        watcher.poll(&mut doc);

        let gone = el(&mut doc, "hit");
        doc.append_child(root, gone).unwrap();
        doc.remove(gone).unwrap();
        assert!(watcher.poll(&mut doc).is_empty());
    }

    #[tokio::test]
    async fn reacquires_replaced_root() {
        let mut doc = Document::new();
        let old_root = mount_root(&mut doc);
        let mut watcher = class_watcher("hit");
        watcher.poll(&mut doc);
        assert_eq!(doc.observer_count(), 1);

        doc.remove(old_root).unwrap();
        let new_root = mount_root(&mut doc);
        let hit = el(&mut doc, "hit");
        doc.append_child(new_root, hit).unwrap();

        assert_eq!(watcher.poll(&mut doc), vec![hit]);
        assert_eq!(doc.observer_count(), 1);
    }

    #[tokio::test]
    async fn stop_leaves_no_observer() {
        let mut doc = Document::new();
        let root = mount_root(&mut doc);
        let mut watcher = class_watcher("hit");
        watcher.poll(&mut doc);
        watcher.stop(&mut doc);
        assert_eq!(doc.observer_count(), 0);

        let late = el(&mut doc, "hit");
        doc.append_child(root, late).unwrap();
        assert!(watcher.poll(&mut doc).is_empty());
        assert!(!watcher.is_observing());
    }
}
