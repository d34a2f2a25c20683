//! User registry and declared skills.
//!
//! The minimum surface the authorizer and the skill matcher need: users
//! carry an admin flag and a skill map (name -> level within configured
//! bounds).

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::FundryError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::engine::EngineCtx;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub is_admin: bool,
    pub created_at: String,
    #[serde(default)]
    pub skills: Vec<UserSkill>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserSkill {
    pub skill: String,
    pub level: i64,
}

pub fn register_user(
    store: &Store,
    _ctx: &EngineCtx,
    name: &str,
    admin: bool,
) -> Result<User, FundryError> {
    if name.trim().is_empty() {
        return Err(FundryError::invalid("name: required"));
    }
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_txn(&db_path, "fundry", "user.register", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let user_id = time::new_prefixed_id("USR");
        let ts = time::now_epoch_z();
        conn.execute(
            "INSERT INTO users(id, name, is_admin, created_at) VALUES(?1, ?2, ?3, ?4)",
            rusqlite::params![user_id, name, admin as i64, ts],
        )?;
        Ok(User {
            id: user_id,
            name: name.to_string(),
            is_admin: admin,
            created_at: ts,
            skills: Vec::new(),
        })
    })
}

/// Upsert one declared skill. Level must sit within the configured
/// bounds (1..=5 by default).
pub fn set_skill(
    store: &Store,
    ctx: &EngineCtx,
    user_id: &str,
    skill: &str,
    level: i64,
) -> Result<(), FundryError> {
    if skill.trim().is_empty() {
        return Err(FundryError::invalid("skill: required"));
    }
    let (lo, hi) = (ctx.config.skill_level_min, ctx.config.skill_level_max);
    if level < lo || level > hi {
        return Err(FundryError::invalid(format!(
            "level: {} outside bounds {}..={}",
            level, lo, hi
        )));
    }

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_txn(&db_path, user_id, "user.set_skill", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        require_user(conn, user_id)?;
        conn.execute(
            "INSERT INTO user_skills(user_id, skill, level) VALUES(?1, ?2, ?3)
             ON CONFLICT(user_id, skill) DO UPDATE SET level = excluded.level",
            rusqlite::params![user_id, skill, level],
        )?;
        Ok(())
    })
}

pub fn drop_skill(store: &Store, user_id: &str, skill: &str) -> Result<(), FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_txn(&db_path, user_id, "user.drop_skill", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        require_user(conn, user_id)?;
        conn.execute(
            "DELETE FROM user_skills WHERE user_id = ?1 AND skill = ?2",
            rusqlite::params![user_id, skill],
        )?;
        Ok(())
    })
}

pub fn get_user(store: &Store, user_id: &str) -> Result<Option<User>, FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_conn(&db_path, "fundry", "user.get", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        fetch_user(conn, user_id)
    })
}

pub(crate) fn fetch_user(conn: &Connection, user_id: &str) -> Result<Option<User>, FundryError> {
    let row = conn
        .query_row(
            "SELECT id, name, is_admin, created_at FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    is_admin: row.get::<_, i64>(2)? != 0,
                    created_at: row.get(3)?,
                    skills: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut user) = row else {
        return Ok(None);
    };
    let mut stmt = conn
        .prepare("SELECT skill, level FROM user_skills WHERE user_id = ?1 ORDER BY skill ASC")?;
    let mut rows = stmt.query(rusqlite::params![user_id])?;
    while let Some(row) = rows.next()? {
        user.skills.push(UserSkill {
            skill: row.get(0)?,
            level: row.get(1)?,
        });
    }
    Ok(Some(user))
}

pub(crate) fn require_user(conn: &Connection, user_id: &str) -> Result<(), FundryError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(FundryError::NotFound(format!("user {}", user_id)));
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "user",
        "version": "0.1.0",
        "description": "User registry with admin flag and declared skills",
        "commands": [
            { "name": "register", "description": "Register a user" },
            { "name": "set-skill", "description": "Declare or update a skill level" },
            { "name": "drop-skill", "description": "Remove a declared skill" },
            { "name": "get", "description": "Show a user with skills" }
        ],
        "storage": ["ledger.db: users, user_skills"]
    })
}

#[derive(Parser, Debug)]
#[clap(name = "user", about = "Manage users and their declared skills.")]
pub struct UserCli {
    #[clap(subcommand)]
    command: UserCommand,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user.
    Register {
        #[clap(value_name = "NAME")]
        name: String,
        /// Grant the administrator flag.
        #[clap(long)]
        admin: bool,
    },
    /// Declare or update a skill level.
    SetSkill {
        #[clap(long)]
        id: String,
        #[clap(long)]
        skill: String,
        #[clap(long)]
        level: i64,
    },
    /// Remove a declared skill.
    DropSkill {
        #[clap(long)]
        id: String,
        #[clap(long)]
        skill: String,
    },
    /// Show a user with skills.
    Get {
        #[clap(long)]
        id: String,
    },
    /// Print subsystem schema metadata.
    Schema,
}

pub fn run_user_cli(store: &Store, ctx: &EngineCtx, cli: UserCli) -> Result<(), FundryError> {
    let out = match &cli.command {
        UserCommand::Register { name, admin } => {
            let user = register_user(store, ctx, name, *admin)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "user.register",
                "status": "ok",
                "user": user,
            })
        }
        UserCommand::SetSkill { id, skill, level } => {
            set_skill(store, ctx, id, skill, *level)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "user.set_skill",
                "status": "ok",
                "id": id,
                "skill": skill,
                "level": level,
            })
        }
        UserCommand::DropSkill { id, skill } => {
            drop_skill(store, id, skill)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "user.drop_skill",
                "status": "ok",
                "id": id,
                "skill": skill,
            })
        }
        UserCommand::Get { id } => {
            let user = get_user(store, id)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "user.get",
                "status": if user.is_some() { "ok" } else { "not_found" },
                "user": user,
            })
        }
        UserCommand::Schema => schema(),
    };
    println!("{}", serde_json::to_string_pretty(&out).unwrap());
    Ok(())
}
