use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::trace;

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("inserting {0} would create a cycle")]
    Cycle(NodeId),
}

// ─── Nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Debug, Default)]
struct Element {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Minimal selector: `#id`, `.class` or a tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(String),
    Class(String),
    Tag(String),
}

impl Selector {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some(id) = s.strip_prefix('#') {
            Self::Id(id.to_string())
        } else if let Some(class) = s.strip_prefix('.') {
            Self::Class(class.to_string())
        } else {
            Self::Tag(s.to_ascii_lowercase())
        }
    }
}

struct Subscription {
    root: NodeId,
    records: Vec<NodeId>,
}

// ─── Document ───────────────────────────────────────────────────────
//
// Arena of elements rooted at `body`. Detached nodes stay in the arena, so
// an id held by in-flight work still resolves after removal.
//
// Insertions under an observed root are queued per subscription as the
// inserted node only; observers walk descendants themselves.

pub struct Document {
    nodes: Vec<Element>,
    body: NodeId,
    subscriptions: HashMap<ObserverId, Subscription>,
    next_observer: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Element {
                tag: "body".into(),
                ..Element::default()
            }],
            body: NodeId(0),
            subscriptions: HashMap::new(),
            next_observer: 1,
        }
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn el(&self, node: NodeId) -> Result<&Element, DomError> {
        self.nodes.get(node.0).ok_or(DomError::UnknownNode(node))
    }

    fn el_mut(&mut self, node: NodeId) -> Result<&mut Element, DomError> {
        self.nodes.get_mut(node.0).ok_or(DomError::UnknownNode(node))
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Element {
            tag: tag.to_ascii_lowercase(),
            ..Element::default()
        });
        id
    }

    pub fn set_id(&mut self, node: NodeId, id: &str) -> Result<(), DomError> {
        self.el_mut(node)?.id = Some(id.to_string());
        Ok(())
    }

    pub fn add_class(&mut self, node: NodeId, class: &str) -> Result<(), DomError> {
        let el = self.el_mut(node)?;
        if !el.classes.iter().any(|c| c == class) {
            el.classes.push(class.to_string());
        }
        Ok(())
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.el(node)
            .map(|e| e.classes.iter().any(|c| c == class))
            .unwrap_or(false)
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.el_mut(node)?
            .attrs
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.el(node).ok()?.attrs.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        self.el_mut(node)?.text = text.to_string();
        Ok(())
    }

    /// Own text followed by descendants' text, in document order.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Ok(el) = self.el(node) else {
            return;
        };
        out.push_str(&el.text);
        for &child in &el.children {
            self.collect_text(child, out);
        }
    }

    /// Take the element out of layout and input.
    pub fn hide(&mut self, node: NodeId) -> Result<(), DomError> {
        self.set_attr(node, "style", "display: none; pointer-events: none;")?;
        self.set_attr(node, "hidden", "")
    }

    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.has_attr(node, "hidden")
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.el(node).ok()?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.el(node).map(|e| e.children.as_slice()).unwrap_or(&[])
    }

    /// Attached to `body` through its parent chain.
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.is_inclusive_ancestor(self.body, node)
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(n) = cur {
            if n == ancestor {
                return true;
            }
            cur = self.parent(n);
        }
        false
    }

    /// Descendants in pre-order, excluding `node` itself.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).iter().rev().copied());
        }
        out
    }

    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        let Ok(el) = self.el(node) else {
            return false;
        };
        match selector {
            Selector::Id(id) => el.id.as_deref() == Some(id.as_str()),
            Selector::Class(class) => el.classes.iter().any(|c| c == class),
            Selector::Tag(tag) => el.tag == *tag,
        }
    }

    /// First connected element matching `selector`, in document order.
    pub fn query(&self, selector: &Selector) -> Option<NodeId> {
        self.query_in(self.body, selector)
    }

    /// First descendant of `root` matching `selector`.
    pub fn query_in(&self, root: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|&n| self.matches(n, selector))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let index = self.el(parent)?.children.len();
        self.insert_at(parent, child, index)
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: NodeId,
    ) -> Result<(), DomError> {
        let index = self
            .el(parent)?
            .children
            .iter()
            .position(|&c| c == reference)
            .ok_or(DomError::NotAChild {
                parent,
                child: reference,
            })?;
        self.insert_at(parent, child, index)
    }

    fn insert_at(&mut self, parent: NodeId, child: NodeId, index: usize) -> Result<(), DomError> {
        self.el(child)?;
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::Cycle(child));
        }
        self.detach(child)?;
        let siblings = &mut self.el_mut(parent)?.children;
        let index = index.min(siblings.len());
        siblings.insert(index, child);
        self.el_mut(child)?.parent = Some(parent);
        self.record_insertion(parent, child);
        Ok(())
    }

    /// Detach `node` from its parent. Removing a detached node is a no-op.
    pub fn remove(&mut self, node: NodeId) -> Result<(), DomError> {
        self.detach(node)
    }

    fn detach(&mut self, node: NodeId) -> Result<(), DomError> {
        let Some(parent) = self.el_mut(node)?.parent.take() else {
            return Ok(());
        };
        self.el_mut(parent)?.children.retain(|&c| c != node);
        Ok(())
    }

    // ─── Mutation observation ───────────────────────────────────────

    pub fn observe(&mut self, root: NodeId) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.subscriptions.insert(
            id,
            Subscription {
                root,
                records: Vec::new(),
            },
        );
        id
    }

    pub fn disconnect(&mut self, observer: ObserverId) {
        self.subscriptions.remove(&observer);
    }

    pub fn observer_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Drain queued insertions for one subscription.
    pub fn take_records(&mut self, observer: ObserverId) -> Vec<NodeId> {
        self.subscriptions
            .get_mut(&observer)
            .map(|s| std::mem::take(&mut s.records))
            .unwrap_or_default()
    }

    fn record_insertion(&mut self, parent: NodeId, child: NodeId) {
        let observed: Vec<ObserverId> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| self.is_inclusive_ancestor(s.root, parent))
            .map(|(id, _)| *id)
            .collect();
        for id in observed {
            if let Some(sub) = self.subscriptions.get_mut(&id) {
                trace!("queued insertion of {} under {}", child, parent);
                sub.records.push(child);
            }
        }
    }
}
