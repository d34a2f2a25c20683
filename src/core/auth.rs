//! Authorization capability: "is actor X the owner/admin for subject Y".
//!
//! Checks run against the same connection (and therefore the same
//! transaction) as the mutation they guard, so a denied actor never
//! leaves a partial state change behind.

use crate::core::error::FundryError;
use rusqlite::{Connection, OptionalExtension};

pub trait Authorizer: Send + Sync {
    fn is_admin(&self, conn: &Connection, actor: &str) -> Result<bool, FundryError>;
    fn is_project_owner(
        &self,
        conn: &Connection,
        actor: &str,
        project_id: &str,
    ) -> Result<bool, FundryError>;
}

/// Default implementation backed by the ledger's `users` and `projects`
/// tables. Unknown actors hold no privileges.
pub struct LedgerAuthorizer;

impl Authorizer for LedgerAuthorizer {
    fn is_admin(&self, conn: &Connection, actor: &str) -> Result<bool, FundryError> {
        let flag: Option<i64> = conn
            .query_row(
                "SELECT is_admin FROM users WHERE id = ?1",
                rusqlite::params![actor],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    fn is_project_owner(
        &self,
        conn: &Connection,
        actor: &str,
        project_id: &str,
    ) -> Result<bool, FundryError> {
        let owner: Option<String> = conn
            .query_row(
                "SELECT owner_id FROM projects WHERE id = ?1",
                rusqlite::params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner.as_deref() == Some(actor))
    }
}
