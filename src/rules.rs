use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, trace};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::dom::{Document, DomError, NodeId, Selector};
use crate::lookup::StatusLookup;
use crate::status::StatusCode;

// ─── Host markup ────────────────────────────────────────────────────

pub const CHAT_ROOT: &str = "#chat-messages";
pub const MESSAGE_CLASS: &str = "chat-message";
pub const SENDER_CLASS: &str = "chat-message__player-name";
pub const MESSAGE_TEXT_CLASS: &str = "chat-message__text";

pub const MENU_ROOT: &str = "#context-menu";
pub const MENU_ITEM_CLASS: &str = "context-menu__item";
pub const MENU_ACTION_CLASS: &str = "context-menu__action";
pub const MENU_TARGET_CLASS: &str = "context-menu__target";

pub const ICON_CLASS: &str = "iron-status-icon";
pub const NOTICE_CLASS: &str = "iron-mode-notice";
pub const ICON_SIZE: u32 = 16;

/// Idempotency marker on chat messages already handled.
pub const PROCESSED_ATTR: &str = "data-iron-processed";
/// Set on context-menu items this plugin hid.
pub const SUPPRESSED_ATTR: &str = "data-iron-suppressed";

pub const TRADE_ACTION: &str = "Trade With";
pub const BANK_ACTION: &str = "Bank";

static TRADE_REQUEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<sender>.+?) wants to trade with you").expect("valid regex"));

// ─── Group mates ────────────────────────────────────────────────────

/// Case-insensitive substring test against the raw group mate text, so
/// "Sam" is admitted by "Samwise, Frodo".
pub fn group_allows(group_names: &str, name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && group_names.to_lowercase().contains(&name.to_lowercase())
}

// ─── Classification ─────────────────────────────────────────────────

pub fn is_chat_message(doc: &Document, node: NodeId) -> bool {
    doc.has_class(node, MESSAGE_CLASS)
}

pub fn is_menu_item(doc: &Document, node: NodeId) -> bool {
    doc.has_class(node, MENU_ITEM_CLASS)
}

fn child_text(doc: &Document, node: NodeId, class: &str) -> Option<String> {
    let child = doc.query_in(node, &Selector::Class(class.to_string()))?;
    let text = doc.text_content(child).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Sender of a "<name> wants to trade with you" system message. Lines
/// posted by a player carry a sender element and are never trade requests.
pub fn trade_request_sender(doc: &Document, message: NodeId) -> Option<String> {
    if doc
        .query_in(message, &Selector::Class(SENDER_CLASS.to_string()))
        .is_some()
    {
        return None;
    }
    let text = child_text(doc, message, MESSAGE_TEXT_CLASS)
        .unwrap_or_else(|| doc.text_content(message));
    TRADE_REQUEST
        .captures(&text)
        .map(|c| c["sender"].trim().to_string())
        .filter(|s| !s.is_empty())
}

// ─── Status augmentation ────────────────────────────────────────────

/// Mark the message handled and return the sender to resolve, or `None`
/// when it was already handled or has no sender element.
pub fn claim_message(doc: &mut Document, message: NodeId) -> Result<Option<String>, DomError> {
    if doc.has_attr(message, PROCESSED_ATTR) {
        return Ok(None);
    }
    doc.set_attr(message, PROCESSED_ATTR, "true")?;
    Ok(child_text(doc, message, SENDER_CLASS).map(|name| {
        name.trim_end_matches(':').trim().to_string()
    }))
}

/// Put the status icon right before the sender's name. Returns whether an
/// icon was inserted.
pub fn insert_status_icon(
    doc: &mut Document,
    message: NodeId,
    status: StatusCode,
) -> Result<bool, DomError> {
    if !status.is_known() || !doc.is_connected(message) {
        return Ok(false);
    }
    let icon_selector = Selector::Class(ICON_CLASS.to_string());
    if doc.query_in(message, &icon_selector).is_some() {
        trace!("message {} already has an icon", message);
        return Ok(false);
    }
    let Some(sender) = doc.query_in(message, &Selector::Class(SENDER_CLASS.to_string())) else {
        return Ok(false);
    };
    let Some(parent) = doc.parent(sender) else {
        return Ok(false);
    };

    let icon = doc.create_element("img");
    doc.add_class(icon, ICON_CLASS)?;
    doc.set_attr(icon, "data-status", status.as_str())?;
    doc.set_attr(icon, "data-helm", if status.is_group() { "med" } else { "full" })?;
    doc.set_attr(icon, "width", &ICON_SIZE.to_string())?;
    doc.set_attr(icon, "height", &ICON_SIZE.to_string())?;
    doc.set_attr(icon, "alt", status.as_str())?;
    doc.insert_before(parent, icon, sender)?;
    Ok(true)
}

/// Full status pipeline for one chat message. The document lock is not held
/// across the lookup, so other messages progress while this one waits.
pub async fn augment_message(
    doc: &Mutex<Document>,
    lookup: &StatusLookup,
    sharing: &AtomicBool,
    message: NodeId,
) -> bool {
    if !sharing.load(Ordering::SeqCst) {
        return false;
    }
    let sender = match claim_message(&mut doc.lock(), message) {
        Ok(Some(sender)) => sender,
        Ok(None) => return false,
        Err(e) => {
            debug!("skipping message {}: {}", message, e);
            return false;
        }
    };

    let Some(status) = lookup.status_of(&sender).await else {
        return false;
    };
    if !sharing.load(Ordering::SeqCst) {
        return false;
    }
    match insert_status_icon(&mut doc.lock(), message, status) {
        Ok(inserted) => inserted,
        Err(e) => {
            debug!("could not add icon for {}: {}", sender, e);
            false
        }
    }
}

// ─── Trade interception ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeOutcome {
    NotTrade,
    Allowed,
    Rebuffed { notice: NodeId },
}

pub fn intercept_trade(
    doc: &mut Document,
    message: NodeId,
    group_names: &str,
) -> Result<TradeOutcome, DomError> {
    if !doc.is_connected(message) || doc.has_class(message, NOTICE_CLASS) {
        return Ok(TradeOutcome::NotTrade);
    }
    let Some(sender) = trade_request_sender(doc, message) else {
        return Ok(TradeOutcome::NotTrade);
    };
    if group_allows(group_names, &sender) {
        debug!("trade request from group mate {}", sender);
        return Ok(TradeOutcome::Allowed);
    }
    let Some(container) = doc.parent(message) else {
        return Ok(TradeOutcome::NotTrade);
    };

    doc.remove(message)?;
    let notice = doc.create_element("div");
    doc.add_class(notice, MESSAGE_CLASS)?;
    doc.add_class(notice, NOTICE_CLASS)?;
    doc.set_attr(notice, PROCESSED_ATTR, "true")?;
    let text = doc.create_element("span");
    doc.add_class(text, MESSAGE_TEXT_CLASS)?;
    doc.set_text(
        text,
        &format!("You stand alone. You rebuffed {}'s trade request.", sender),
    )?;
    doc.append_child(notice, text)?;
    doc.append_child(container, notice)?;
    info!("Rebuffed trade request from {}", sender);
    Ok(TradeOutcome::Rebuffed { notice })
}

// ─── Context menu ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuOutcome {
    NotApplicable,
    Allowed,
    Suppressed,
}

/// Restrictions in force for context-menu filtering.
#[derive(Debug, Clone, Copy)]
pub struct MenuRules<'a> {
    pub block_trades: bool,
    pub block_bank: bool,
    pub group_names: &'a str,
}

pub fn filter_menu_item(
    doc: &mut Document,
    item: NodeId,
    rules: MenuRules<'_>,
) -> Result<MenuOutcome, DomError> {
    if doc.has_attr(item, SUPPRESSED_ATTR) {
        return Ok(MenuOutcome::NotApplicable);
    }
    let Some(action) = child_text(doc, item, MENU_ACTION_CLASS) else {
        return Ok(MenuOutcome::NotApplicable);
    };

    let suppress = match action.as_str() {
        TRADE_ACTION if rules.block_trades => {
            let Some(target) = child_text(doc, item, MENU_TARGET_CLASS) else {
                return Ok(MenuOutcome::NotApplicable);
            };
            !group_allows(rules.group_names, &target)
        }
        BANK_ACTION if rules.block_bank => true,
        _ => return Ok(MenuOutcome::NotApplicable),
    };
    if !suppress {
        return Ok(MenuOutcome::Allowed);
    }

    doc.hide(item)?;
    doc.set_attr(item, SUPPRESSED_ATTR, "true")?;
    debug!("suppressed \"{}\" menu item {}", action, item);
    Ok(MenuOutcome::Suppressed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::StatusCache;
    use crate::lookup::tests::FakeStore;
    use crate::remote::StatusStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    pub(crate) fn mount(doc: &mut Document, id: &str) -> NodeId {
        let root = doc.create_element("div");
        doc.set_id(root, id).unwrap();
        let body = doc.body();
        doc.append_child(body, root).unwrap();
        root
    }

    /// `<div.chat-message><span.name>{sender}:</span><span.text>{text}</span></div>`
    pub(crate) fn chat_message(
        doc: &mut Document,
        sender: Option<&str>,
        text: &str,
    ) -> NodeId {
        let msg = doc.create_element("div");
        doc.add_class(msg, MESSAGE_CLASS).unwrap();
        if let Some(sender) = sender {
            let name = doc.create_element("span");
            doc.add_class(name, SENDER_CLASS).unwrap();
            doc.set_text(name, &format!("{}:", sender)).unwrap();
            doc.append_child(msg, name).unwrap();
        }
        let body = doc.create_element("span");
        doc.add_class(body, MESSAGE_TEXT_CLASS).unwrap();
        doc.set_text(body, text).unwrap();
        doc.append_child(msg, body).unwrap();
        msg
    }

    pub(crate) fn menu_item(doc: &mut Document, action: &str, target: &str) -> NodeId {
        let item = doc.create_element("div");
        doc.add_class(item, MENU_ITEM_CLASS).unwrap();
        let a = doc.create_element("span");
        doc.add_class(a, MENU_ACTION_CLASS).unwrap();
        doc.set_text(a, action).unwrap();
        doc.append_child(item, a).unwrap();
        let t = doc.create_element("span");
        doc.add_class(t, MENU_TARGET_CLASS).unwrap();
        doc.set_text(t, target).unwrap();
        doc.append_child(item, t).unwrap();
        item
    }

    fn icons(doc: &Document, message: NodeId) -> usize {
        doc.descendants(message)
            .into_iter()
            .filter(|&n| doc.has_class(n, ICON_CLASS))
            .count()
    }

    fn notices(doc: &Document, root: NodeId) -> usize {
        doc.descendants(root)
            .into_iter()
            .filter(|&n| doc.has_class(n, NOTICE_CLASS))
            .count()
    }

    #[test]
    fn group_matching_is_case_insensitive_substring() {
        assert!(group_allows("Frodo, Sam", "sam"));
        assert!(group_allows("Frodo, Sam", "FRODO"));
        assert!(group_allows("Samwise", "Sam"));
        assert!(group_allows("Frodo, Sam", "odo"));
        assert!(!group_allows("Frodo, Sam", "Merry"));
        assert!(!group_allows("Frodo, Sam", "  "));
        assert!(!group_allows("", "Sam"));
    }

    #[test]
    fn detects_trade_requests() {
        let mut doc = Document::new();
        let msg = chat_message(&mut doc, None, "Sam wants to trade with you.");
        assert_eq!(trade_request_sender(&doc, msg).as_deref(), Some("Sam"));

        let chat = chat_message(&mut doc, Some("Sam"), "wanna trade?");
        assert_eq!(trade_request_sender(&doc, chat), None);
    }

    #[test]
    fn icon_goes_before_sender_once() {
        let mut doc = Document::new();
        let root = mount(&mut doc, "chat-messages");
        let msg = chat_message(&mut doc, Some("Frodo"), "hello");
        doc.append_child(root, msg).unwrap();

        assert_eq!(claim_message(&mut doc, msg).unwrap().as_deref(), Some("Frodo"));
        assert_eq!(claim_message(&mut doc, msg).unwrap(), None);

        assert!(insert_status_icon(&mut doc, msg, StatusCode::Hcim).unwrap());
        assert!(!insert_status_icon(&mut doc, msg, StatusCode::Hcim).unwrap());
        assert_eq!(icons(&doc, msg), 1);

        let children = doc.children(msg);
        assert!(doc.has_class(children[0], ICON_CLASS));
        assert!(doc.has_class(children[1], SENDER_CLASS));
        assert_eq!(doc.attr(children[0], "width"), Some("16"));
        assert_eq!(doc.attr(children[0], "data-status"), Some("HCIM"));
    }

    #[test]
    fn unknown_status_or_missing_sender_adds_nothing() {
        let mut doc = Document::new();
        let root = mount(&mut doc, "chat-messages");
        let msg = chat_message(&mut doc, Some("Gollum"), "precious");
        let system = chat_message(&mut doc, None, "Server restart soon");
        doc.append_child(root, msg).unwrap();
        doc.append_child(root, system).unwrap();

        assert!(!insert_status_icon(&mut doc, msg, StatusCode::Unknown).unwrap());
        assert_eq!(claim_message(&mut doc, system).unwrap(), None);
        assert!(!insert_status_icon(&mut doc, system, StatusCode::Im).unwrap());
        assert_eq!(icons(&doc, msg) + icons(&doc, system), 0);
    }

    #[tokio::test]
    async fn augmenting_same_message_twice_adds_one_icon() {
        let mut doc = Document::new();
        let root = mount(&mut doc, "chat-messages");
        let msg = chat_message(&mut doc, Some("Sam"), "po-tay-toes");
        doc.append_child(root, msg).unwrap();
        let doc = Mutex::new(doc);

        let store: Arc<dyn StatusStore> = Arc::new(FakeStore::with(&[("sam", StatusCode::Gim)]));
        let lookup = StatusLookup::new(Arc::new(StatusCache::default()), store);
        let sharing = AtomicBool::new(true);

        let (a, b) = tokio::join!(
            augment_message(&doc, &lookup, &sharing, msg),
            augment_message(&doc, &lookup, &sharing, msg),
        );
        assert!(a ^ b);
        let doc = doc.lock();
        assert_eq!(icons(&doc, msg), 1);
    }

    #[tokio::test]
    async fn augment_is_gated_on_sharing() {
        let mut doc = Document::new();
        let root = mount(&mut doc, "chat-messages");
        let msg = chat_message(&mut doc, Some("Sam"), "hi");
        doc.append_child(root, msg).unwrap();
        let doc = Mutex::new(doc);

        let store: Arc<dyn StatusStore> = Arc::new(FakeStore::with(&[("sam", StatusCode::Gim)]));
        let lookup = StatusLookup::new(Arc::new(StatusCache::default()), store);
        let sharing = AtomicBool::new(false);

        assert!(!augment_message(&doc, &lookup, &sharing, msg).await);
        assert!(!doc.lock().has_attr(msg, PROCESSED_ATTR));
    }

    #[test]
    fn non_group_trade_is_replaced_by_one_notice() {
        let mut doc = Document::new();
        let root = mount(&mut doc, "chat-messages");
        let msg = chat_message(&mut doc, None, "Gollum wants to trade with you.");
        doc.append_child(root, msg).unwrap();

        let outcome = intercept_trade(&mut doc, msg, "Frodo, Sam").unwrap();
        assert!(matches!(outcome, TradeOutcome::Rebuffed { .. }));
        assert!(!doc.is_connected(msg));
        assert_eq!(notices(&doc, root), 1);
        assert!(doc.text_content(root).contains("stand alone"));

        // Seeing it again does nothing more.
        assert_eq!(
            intercept_trade(&mut doc, msg, "Frodo, Sam").unwrap(),
            TradeOutcome::NotTrade
        );
        assert_eq!(notices(&doc, root), 1);
    }

    #[test]
    fn player_typed_trade_text_is_ordinary_chat() {
        let mut doc = Document::new();
        let root = mount(&mut doc, "chat-messages");
        let msg = chat_message(&mut doc, Some("Gollum"), "Bob wants to trade with you lol");
        doc.append_child(root, msg).unwrap();

        assert_eq!(trade_request_sender(&doc, msg), None);
        assert_eq!(
            intercept_trade(&mut doc, msg, "Frodo, Sam").unwrap(),
            TradeOutcome::NotTrade
        );
        assert!(doc.is_connected(msg));
        assert_eq!(notices(&doc, root), 0);
    }

    #[test]
    fn group_trade_is_left_alone() {
        let mut doc = Document::new();
        let root = mount(&mut doc, "chat-messages");
        let msg = chat_message(&mut doc, None, "sam wants to trade with you.");
        doc.append_child(root, msg).unwrap();

        assert_eq!(
            intercept_trade(&mut doc, msg, "Frodo, Sam").unwrap(),
            TradeOutcome::Allowed
        );
        assert!(doc.is_connected(msg));
        assert_eq!(doc.children(root), &[msg]);
    }

    #[test]
    fn trade_with_hidden_for_strangers_only() {
        let mut doc = Document::new();
        let root = mount(&mut doc, "context-menu");
        let stranger = menu_item(&mut doc, "Trade With", "Gollum");
        let mate = menu_item(&mut doc, "Trade With", "Sam");
        let follow = menu_item(&mut doc, "Follow", "Gollum");
        for n in [stranger, mate, follow] {
            doc.append_child(root, n).unwrap();
        }
        let rules = MenuRules {
            block_trades: true,
            block_bank: false,
            group_names: "Frodo, Sam",
        };

        assert_eq!(filter_menu_item(&mut doc, stranger, rules).unwrap(), MenuOutcome::Suppressed);
        assert_eq!(filter_menu_item(&mut doc, mate, rules).unwrap(), MenuOutcome::Allowed);
        assert_eq!(filter_menu_item(&mut doc, follow, rules).unwrap(), MenuOutcome::NotApplicable);

        assert!(doc.is_hidden(stranger));
        assert_eq!(doc.attr(stranger, SUPPRESSED_ATTR), Some("true"));
        assert!(!doc.is_hidden(mate));
        assert!(!doc.has_attr(mate, SUPPRESSED_ATTR));
    }

    #[test]
    fn label_must_match_exactly() {
        let mut doc = Document::new();
        let item = menu_item(&mut doc, "Trade With Friends", "Gollum");
        let rules = MenuRules {
            block_trades: true,
            block_bank: false,
            group_names: "",
        };
        assert_eq!(filter_menu_item(&mut doc, item, rules).unwrap(), MenuOutcome::NotApplicable);
    }

    #[test]
    fn ultimate_loses_bank_option() {
        let mut doc = Document::new();
        let bank = menu_item(&mut doc, "Bank", "Banker");
        let off = MenuRules {
            block_trades: true,
            block_bank: false,
            group_names: "",
        };
        assert_eq!(filter_menu_item(&mut doc, bank, off).unwrap(), MenuOutcome::NotApplicable);
        let on = MenuRules {
            block_bank: true,
            ..off
        };
        assert_eq!(filter_menu_item(&mut doc, bank, on).unwrap(), MenuOutcome::Suppressed);
        assert!(doc.is_hidden(bank));
    }
}
