use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &str) -> Result<Connection, error::FundryError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::FundryError::Storage)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::FundryError::Storage)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::FundryError::Storage)?;
    Ok(conn)
}

pub fn ledger_db_path(root: &Path) -> PathBuf {
    root.join(schemas::LEDGER_DB_NAME)
}

pub fn initialize_ledger_db(root: &Path) -> Result<(), error::FundryError> {
    fs::create_dir_all(root).map_err(error::FundryError::Io)?;
    let db_path = ledger_db_path(root);

    let broker = DbBroker::new(root);
    broker.with_conn(&db_path, "fundry", "ledger.init", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        Ok(())
    })?;

    Ok(())
}
