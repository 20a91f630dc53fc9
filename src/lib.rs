//! Iron-mode status icons and trade restrictions for a live game chat.
//!
//! A [`session::Session`] watches the host's chat and context-menu trees,
//! tags chat senders with their published iron status, blocks trades from
//! outside the player's group, and keeps the player's own status published.

pub mod cache;
pub mod config;
pub mod dom;
pub mod logging;
pub mod lookup;
pub mod remote;
pub mod rules;
pub mod session;
pub mod status;
pub mod sync;
pub mod watcher;
