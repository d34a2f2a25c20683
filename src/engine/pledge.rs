//! The atomic "fund a project" operation.
//!
//! One `BEGIN IMMEDIATE` transaction inserts the pledge row, takes the
//! reward slot through a guarded increment, and moves the project's
//! raised-amount aggregate. The guarded `WHERE claimed_count < capacity`
//! re-check runs against the row the transaction holds, so two pledges
//! racing for the last slot can never both succeed, and raised_amount
//! never loses an update. Pledges are immutable once committed.

use crate::core::broker::DbBroker;
use crate::core::cache::{self, EntityCache};
use crate::core::db;
use crate::core::error::FundryError;
use crate::core::notify;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::engine::{lifecycle, reward, users, EngineCtx};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Pledge {
    pub id: String,
    pub project_id: String,
    pub backer_id: String,
    pub reward_id: Option<String>,
    pub amount: i64,
    pub created_at: String,
}

/// What the backer gets back: the pledge id and the project's new
/// raised amount as of the commit.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PledgeReceipt {
    pub pledge_id: String,
    pub raised_amount: i64,
}

pub fn pledge(
    store: &Store,
    ctx: &EngineCtx,
    project_id: &str,
    backer_id: &str,
    amount: i64,
    reward_id: Option<&str>,
) -> Result<PledgeReceipt, FundryError> {
    if amount <= 0 {
        return Err(FundryError::invalid("amount: must be positive"));
    }

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let receipt = broker.with_txn(&db_path, backer_id, "pledge.commit", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let project = lifecycle::fetch_project(conn, project_id)?;
        if project.state != "published" {
            return Err(FundryError::ProjectNotOpen(format!(
                "project {} is '{}', not 'published'",
                project_id, project.state
            )));
        }
        match project.deadline {
            Some(deadline) if time::now_unix_secs() < deadline => {}
            _ => {
                return Err(FundryError::ProjectNotOpen(format!(
                    "project {} deadline has passed",
                    project_id
                )));
            }
        }
        users::require_user(conn, backer_id)?;

        if let Some(rid) = reward_id {
            let tier = reward::fetch_reward(conn, rid)?
                .ok_or_else(|| FundryError::NotFound(format!("reward {}", rid)))?;
            if tier.project_id != project_id {
                return Err(FundryError::NotFound(format!(
                    "reward {} does not belong to project {}",
                    rid, project_id
                )));
            }
            if amount < tier.minimum {
                return Err(FundryError::AmountTooLow {
                    offered: amount,
                    minimum: tier.minimum,
                });
            }
            if let Some(cap) = tier.capacity {
                if tier.claimed_count >= cap {
                    return Err(FundryError::RewardExhausted(rid.to_string()));
                }
            }
        }

        let pledge_id = time::new_prefixed_id("PLG");
        let ts = time::now_epoch_z();
        conn.execute(
            "INSERT INTO pledges(id, project_id, backer_id, reward_id, amount, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![pledge_id, project_id, backer_id, reward_id, amount, ts],
        )?;

        if let Some(rid) = reward_id {
            // Guarded re-check: the slot is taken only if still available
            // inside this transaction.
            let changed = conn.execute(
                "UPDATE rewards SET claimed_count = claimed_count + 1
                 WHERE id = ?1 AND (capacity IS NULL OR claimed_count < capacity)",
                rusqlite::params![rid],
            )?;
            if changed == 0 {
                return Err(FundryError::RewardExhausted(rid.to_string()));
            }
        }

        conn.execute(
            "UPDATE projects SET raised_amount = raised_amount + ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![amount, ts, project_id],
        )?;
        let raised: i64 = conn.query_row(
            "SELECT raised_amount FROM projects WHERE id = ?1",
            rusqlite::params![project_id],
            |row| row.get(0),
        )?;

        Ok(PledgeReceipt {
            pledge_id,
            raised_amount: raised,
        })
    })?;

    ctx.cache.invalidate(&cache::project_key(project_id));
    if let Some(rid) = reward_id {
        ctx.cache.invalidate(&cache::reward_key(rid));
    }
    notify::emit_best_effort(
        ctx.sink.as_ref(),
        "pledge_committed",
        project_id,
        serde_json::json!({
            "pledge_id": receipt.pledge_id,
            "backer_id": backer_id,
            "amount": amount,
            "reward_id": reward_id,
            "raised_amount": receipt.raised_amount,
        }),
    );

    Ok(receipt)
}

pub fn list_pledges(store: &Store, project_id: &str) -> Result<Vec<Pledge>, FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_conn(&db_path, "fundry", "pledge.list", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, backer_id, reward_id, amount, created_at
             FROM pledges WHERE project_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query(rusqlite::params![project_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Pledge {
                id: row.get(0)?,
                project_id: row.get(1)?,
                backer_id: row.get(2)?,
                reward_id: row.get(3)?,
                amount: row.get(4)?,
                created_at: row.get(5)?,
            });
        }
        Ok(out)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "pledge",
        "version": "0.1.0",
        "description": "Atomic pledge commit with reward reservation and raised-amount aggregate",
        "commands": [
            { "name": "commit", "description": "Pledge to a published project" },
            { "name": "list", "description": "List a project's pledges" }
        ],
        "storage": ["ledger.db: pledges"]
    })
}

#[derive(Parser, Debug)]
#[clap(name = "pledge", about = "Back a published project, optionally claiming a reward tier.")]
pub struct PledgeCli {
    #[clap(subcommand)]
    command: PledgeCommand,
}

#[derive(Subcommand, Debug)]
pub enum PledgeCommand {
    /// Commit a pledge.
    Commit {
        #[clap(long)]
        project: String,
        #[clap(long)]
        backer: String,
        /// Amount in cents.
        #[clap(long)]
        amount: i64,
        /// Reward tier to claim.
        #[clap(long)]
        reward: Option<String>,
    },
    /// List a project's pledges.
    List {
        #[clap(long)]
        project: String,
    },
    /// Print subsystem schema metadata.
    Schema,
}

pub fn run_pledge_cli(store: &Store, ctx: &EngineCtx, cli: PledgeCli) -> Result<(), FundryError> {
    let out = match &cli.command {
        PledgeCommand::Commit {
            project,
            backer,
            amount,
            reward,
        } => {
            let receipt = pledge(store, ctx, project, backer, *amount, reward.as_deref())?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "pledge.commit",
                "status": "ok",
                "receipt": receipt,
            })
        }
        PledgeCommand::List { project } => {
            let items = list_pledges(store, project)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "pledge.list",
                "status": "ok",
                "items": items,
            })
        }
        PledgeCommand::Schema => schema(),
    };
    println!("{}", serde_json::to_string_pretty(&out).unwrap());
    Ok(())
}
