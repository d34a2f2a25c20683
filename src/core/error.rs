use rusqlite;
use std::io;
use thiserror::Error;

/// Typed error surface for every engine operation.
///
/// Business-rule violations carry machine-readable detail (field names,
/// unmet skill requirements); message localization is the caller's job.
#[derive(Error, Debug)]
pub enum FundryError {
    #[error("SQLite error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not permitted: {0}")]
    Authorization(String),
    #[error("project not open for funding: {0}")]
    ProjectNotOpen(String),
    #[error("reward tier exhausted: {0}")]
    RewardExhausted(String),
    #[error("amount {offered} below reward minimum {minimum}")]
    AmountTooLow { offered: i64, minimum: i64 },
    #[error("role has no open slots: {0}")]
    RoleFull(String),
    #[error("skill requirements unmet: {}", .0.join("; "))]
    SkillMismatch(Vec<String>),
    #[error("an application for this role already exists")]
    DuplicateApplication,
    #[error("comment already has a reply")]
    DuplicateReply,
    #[error("application already decided")]
    AlreadyDecided,
    #[error("project already closed: {0}")]
    AlreadyClosed(String),
}

impl FundryError {
    /// Single-message validation failure.
    pub fn invalid(msg: impl Into<String>) -> Self {
        FundryError::Validation(vec![msg.into()])
    }
}
