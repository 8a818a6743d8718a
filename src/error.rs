//! Error types for feedmail.

use thiserror::Error;

/// Common error type for feedmail.
#[derive(Error, Debug)]
pub enum FeedmailError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error. Always fatal: the run aborts before any work.
    #[error("configuration error: {0}")]
    Config(String),

    /// Template compile or render error.
    #[error("template error: {0}")]
    Template(#[from] crate::template::TemplateError),

    /// Feed fetch or parse error.
    #[error("feed error: {0}")]
    Feed(String),

    /// External feed command failed to run or exited unsuccessfully.
    #[error("command error: {0}")]
    Command(String),

    /// Notification delivery error.
    #[error("delivery error: {0}")]
    Delivery(String),
}

/// Result type alias for feedmail operations.
pub type Result<T> = std::result::Result<T, FeedmailError>;
