//! Reminder Bot - chat reminder daemon
//!
//! Pulls text commands from a bot update feed, keeps a durable list of
//! reminders and fires each one once when its local minute comes around.

pub mod bot;
pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod error;
pub mod liveness;
pub mod matcher;
pub mod store;
pub mod telegram;
pub mod transport;
pub mod trigger;

pub use error::{Error, Result};
