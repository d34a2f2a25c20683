//! Reward inventory: funding tiers with a price floor and bounded
//! capacity.
//!
//! Capacity enforcement (at-most-N claims) lives in the pledge
//! transaction, not here; this module owns tier setup and the cached
//! read path.

use crate::core::auth::Authorizer;
use crate::core::broker::DbBroker;
use crate::core::cache::{self, EntityCache};
use crate::core::db;
use crate::core::error::FundryError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::engine::{lifecycle, EngineCtx};
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Reward {
    pub id: String,
    pub project_id: String,
    pub title: String,
    /// Minimum pledge in cents.
    pub minimum: i64,
    /// `None` means unlimited claims.
    pub capacity: Option<i64>,
    pub claimed_count: i64,
    pub created_at: String,
}

/// Add a tier to a project still being set up (`draft` or `in_review`).
pub fn add_reward(
    store: &Store,
    ctx: &EngineCtx,
    actor: &str,
    project_id: &str,
    title: &str,
    minimum: i64,
    capacity: Option<i64>,
) -> Result<Reward, FundryError> {
    let mut problems = Vec::new();
    if title.trim().is_empty() {
        problems.push("title: required".to_string());
    }
    if minimum <= 0 {
        problems.push("minimum: must be positive".to_string());
    }
    if let Some(cap) = capacity {
        if cap <= 0 {
            problems.push("capacity: must be positive when set".to_string());
        }
    }
    if !problems.is_empty() {
        return Err(FundryError::Validation(problems));
    }

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let reward = broker.with_txn(&db_path, actor, "reward.add", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let project = lifecycle::fetch_project(conn, project_id)?;
        let reward_id = time::new_prefixed_id("RWD");
        let ts = time::now_epoch_z();
        if !ctx.authorizer.is_project_owner(conn, actor, project_id)? {
            return Err(FundryError::Authorization(format!(
                "only the owner may add rewards to project {}",
                project_id
            )));
        }
        if project.state != "draft" && project.state != "in_review" {
            return Err(FundryError::invalid(format!(
                "cannot add rewards in state '{}'; tiers are set up before publication",
                project.state
            )));
        }
        conn.execute(
            "INSERT INTO rewards(id, project_id, title, minimum, capacity, claimed_count, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, 0, ?6)",
            rusqlite::params![reward_id, project_id, title, minimum, capacity, ts],
        )?;
        fetch_reward(conn, &reward_id)?
            .ok_or_else(|| FundryError::NotFound(format!("reward {}", reward_id)))
    })?;

    Ok(reward)
}

/// Delete a tier; refused once anyone has claimed it.
pub fn delete_reward(
    store: &Store,
    ctx: &EngineCtx,
    actor: &str,
    reward_id: &str,
) -> Result<(), FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let project_id = broker.with_txn(&db_path, actor, "reward.delete", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let reward = fetch_reward(conn, reward_id)?
            .ok_or_else(|| FundryError::NotFound(format!("reward {}", reward_id)))?;
        if !ctx
            .authorizer
            .is_project_owner(conn, actor, &reward.project_id)?
        {
            return Err(FundryError::Authorization(format!(
                "only the owner may delete reward {}",
                reward_id
            )));
        }
        if reward.claimed_count > 0 {
            return Err(FundryError::invalid(format!(
                "reward {} has {} claims and cannot be deleted",
                reward_id, reward.claimed_count
            )));
        }
        conn.execute(
            "DELETE FROM rewards WHERE id = ?1",
            rusqlite::params![reward_id],
        )?;
        Ok(reward.project_id)
    })?;

    ctx.cache.invalidate(&cache::reward_key(reward_id));
    ctx.cache.invalidate(&cache::project_key(&project_id));
    Ok(())
}

pub fn list_rewards(store: &Store, project_id: &str) -> Result<Vec<Reward>, FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_conn(&db_path, "fundry", "reward.list", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, title, minimum, capacity, claimed_count, created_at
             FROM rewards WHERE project_id = ?1 ORDER BY minimum ASC",
        )?;
        let mut rows = stmt.query(rusqlite::params![project_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(reward_from_row(row)?);
        }
        Ok(out)
    })
}

/// Read-through cached lookup for display paths. The pledge transaction
/// never consults this; its capacity decision reads the row it locks.
pub fn get_reward(
    store: &Store,
    ctx: &EngineCtx,
    reward_id: &str,
) -> Result<Option<Reward>, FundryError> {
    let key = cache::reward_key(reward_id);
    if let Some(hit) = ctx.cache.get(&key) {
        if let Ok(reward) = serde_json::from_str::<Reward>(&hit) {
            return Ok(Some(reward));
        }
    }

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let found = broker.with_conn(&db_path, "fundry", "reward.get", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        fetch_reward(conn, reward_id)
    })?;

    if let Some(ref reward) = found {
        if let Ok(json) = serde_json::to_string(reward) {
            ctx.cache.put(&key, json);
        }
    }
    Ok(found)
}

pub(crate) fn fetch_reward(
    conn: &Connection,
    reward_id: &str,
) -> Result<Option<Reward>, FundryError> {
    Ok(conn
        .query_row(
            "SELECT id, project_id, title, minimum, capacity, claimed_count, created_at
             FROM rewards WHERE id = ?1",
            rusqlite::params![reward_id],
            |row| {
                Ok(Reward {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    title: row.get(2)?,
                    minimum: row.get(3)?,
                    capacity: row.get(4)?,
                    claimed_count: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?)
}

fn reward_from_row(row: &rusqlite::Row<'_>) -> Result<Reward, FundryError> {
    Ok(Reward {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        minimum: row.get(3)?,
        capacity: row.get(4)?,
        claimed_count: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "reward",
        "version": "0.1.0",
        "description": "Reward tiers with price floor and bounded capacity",
        "commands": [
            { "name": "add", "description": "Add a tier to a draft/in-review project" },
            { "name": "delete", "description": "Delete an unclaimed tier" },
            { "name": "list", "description": "List a project's tiers" },
            { "name": "get", "description": "Show one tier (cached read path)" }
        ],
        "storage": ["ledger.db: rewards"]
    })
}

#[derive(Parser, Debug)]
#[clap(name = "reward", about = "Manage a project's reward tiers.")]
pub struct RewardCli {
    #[clap(subcommand)]
    command: RewardCommand,
}

#[derive(Subcommand, Debug)]
pub enum RewardCommand {
    /// Add a reward tier.
    Add {
        #[clap(value_name = "TITLE")]
        title: String,
        #[clap(long)]
        project: String,
        #[clap(long)]
        actor: String,
        /// Minimum pledge in cents.
        #[clap(long)]
        minimum: i64,
        /// Claim capacity; omit for unlimited.
        #[clap(long)]
        capacity: Option<i64>,
    },
    /// Delete an unclaimed tier.
    Delete {
        #[clap(long)]
        id: String,
        #[clap(long)]
        actor: String,
    },
    /// List a project's tiers.
    List {
        #[clap(long)]
        project: String,
    },
    /// Show one tier.
    Get {
        #[clap(long)]
        id: String,
    },
    /// Print subsystem schema metadata.
    Schema,
}

pub fn run_reward_cli(store: &Store, ctx: &EngineCtx, cli: RewardCli) -> Result<(), FundryError> {
    let out = match &cli.command {
        RewardCommand::Add {
            title,
            project,
            actor,
            minimum,
            capacity,
        } => {
            let reward = add_reward(store, ctx, actor, project, title, *minimum, *capacity)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "reward.add",
                "status": "ok",
                "reward": reward,
            })
        }
        RewardCommand::Delete { id, actor } => {
            delete_reward(store, ctx, actor, id)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "reward.delete",
                "status": "ok",
                "id": id,
            })
        }
        RewardCommand::List { project } => {
            let items = list_rewards(store, project)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "reward.list",
                "status": "ok",
                "items": items,
            })
        }
        RewardCommand::Get { id } => {
            let reward = get_reward(store, ctx, id)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "reward.get",
                "status": if reward.is_some() { "ok" } else { "not_found" },
                "reward": reward,
            })
        }
        RewardCommand::Schema => schema(),
    };
    println!("{}", serde_json::to_string_pretty(&out).unwrap());
    Ok(())
}
