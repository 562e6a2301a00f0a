//! Error types for reminder-bot

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("No reminder number {0}")]
    NotFound(usize),

    #[error("Schedule store corrupt: {0}")]
    StoreCorruption(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Feed pull or send failures. Swallowed by the poll loop and retried next tick.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Transport(_))
    }

    /// Text safe to show to the chat user, if this error is the user's to fix.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Error::Validation(reason) => Some(reason.clone()),
            Error::NotFound(_) => Some("No reminder with that number".to_string()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
