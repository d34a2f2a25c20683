use crate::core::db;
use crate::core::error;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use ulid::Ulid;

/// The DB Broker is the thin waist for ledger access: every read goes
/// through `with_conn`, every mutation through `with_txn`, and each
/// operation leaves an audit record in `broker.events.jsonl`.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join("broker.events.jsonl"),
        }
    }

    /// Execute a read closure against a fresh WAL connection.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::FundryError>
    where
        F: FnOnce(&Connection) -> Result<R, error::FundryError>,
    {
        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let conn = db::db_connect(&db_path.to_string_lossy())?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, &db_id, status)?;

        result
    }

    /// Execute a mutation closure inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// Commit-or-nothing: a closure error rolls the whole transaction back.
    /// Same-process writers are serialized by an in-process lock; the
    /// immediate transaction serializes cross-process ones. A transient
    /// busy/locked failure is retried once before surfacing, so the closure
    /// must be re-runnable (generate ids inside it).
    pub fn with_txn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        mut f: F,
    ) -> Result<R, error::FundryError>
    where
        F: FnMut(&Connection) -> Result<R, error::FundryError>,
    {
        static WRITE_LOCK: Mutex<()> = Mutex::new(());
        let _lock = WRITE_LOCK.lock().unwrap();

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let mut retried = false;
        let result = loop {
            match Self::attempt_txn(db_path, &mut f) {
                Err(e) if is_transient(&e) && !retried => {
                    retried = true;
                    continue;
                }
                other => break other,
            }
        };

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, op_name, &db_id, status)?;

        result
    }

    fn attempt_txn<F, R>(db_path: &Path, f: &mut F) -> Result<R, error::FundryError>
    where
        F: FnMut(&Connection) -> Result<R, error::FundryError>,
    {
        let mut conn = db::db_connect(&db_path.to_string_lossy())?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn log_event(
        &self,
        actor: &str,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::FundryError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let ev = BrokerEvent {
            ts: crate::core::time::now_epoch_z(),
            event_id: Ulid::new().to_string(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::FundryError::Io)?;

        writeln!(f, "{}", serde_json::to_string(&ev).unwrap()).map_err(error::FundryError::Io)?;
        Ok(())
    }
}

/// Busy/locked failures are the only retryable class; business errors
/// surface untouched.
fn is_transient(err: &error::FundryError) -> bool {
    match err {
        error::FundryError::Storage(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "broker",
        "version": "0.1.0",
        "description": "Ledger mutation broker (the thin waist)",
        "commands": [],
        "storage": ["broker.events.jsonl"]
    })
}
