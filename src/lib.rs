//! Fundry: the Funding & Project-Lifecycle Engine of a crowdfunding
//! marketplace.
//!
//! Creators publish projects (hardware or software), backers pledge
//! money against tiered rewards, and software projects recruit
//! contributors through skill-matched applications. The engine owns the
//! pieces where multiple actors mutate shared aggregate state:
//!
//! - the project lifecycle state machine
//!   (`draft -> in_review -> published -> closed`, with a `draft`
//!   re-entry on rejection),
//! - the atomic pledge operation: reward reservation plus the
//!   raised-amount aggregate, committed in one transaction,
//! - the skill-matched candidature workflow with headcount tracking,
//! - the single-reply comment invariant.
//!
//! # Architecture
//!
//! All state lives in one SQLite ledger (`ledger.db`, WAL, foreign keys
//! on) under a store root directory. Every access routes through the
//! [`core::broker::DbBroker`]: reads get fresh WAL connections,
//! mutations run inside `BEGIN IMMEDIATE` transactions with one
//! transparent retry on transient busy failures, and each operation
//! leaves an audit record in `broker.events.jsonl`.
//!
//! The three contended counters — a reward's `claimed_count`, a role's
//! `filled_count`, a project's `raised_amount` — only ever move through
//! guarded `UPDATE ... WHERE` statements inside those transactions, so
//! capacity and headcount hold at-most-N even under concurrent callers.
//!
//! External collaborators are capability traits the engine calls, never
//! hidden globals: [`core::auth::Authorizer`] answers owner/admin
//! questions, [`core::notify::NotificationSink`] takes fire-and-forget
//! event records after commit, and [`core::cache::EntityCache`] is an
//! explicit read-through cache whose keys are invalidated by the writes
//! that touch the same entity.
//!
//! # Example
//!
//! ```bash
//! # Initialize a store
//! fundry init
//!
//! # Publish a project
//! fundry user register "ada" --admin
//! fundry project create "Open Telescope" --owner USR_... --kind hardware
//! fundry project submit --id PRJ_... --actor USR_...
//! fundry project approve --id PRJ_... --admin USR_...
//!
//! # Back it
//! fundry pledge commit --project PRJ_... --backer USR_... --amount 6000
//! ```

pub mod cli;
pub mod core;
pub mod engine;

use crate::cli::{Cli, Command};
use crate::core::db;
use crate::core::error::FundryError;
use crate::core::store::Store;
use crate::engine::{candidature, comment, lifecycle, pledge, reward, users, EngineCtx};
use clap::Parser;

pub fn run() -> Result<(), FundryError> {
    let cli = Cli::parse();
    let store = Store::resolve(cli.dir.as_deref());

    match cli.command {
        Command::Init => {
            use colored::Colorize;
            db::initialize_ledger_db(&store.root)?;
            println!(
                "{} ledger initialized at {}",
                "ok".green().bold(),
                db::ledger_db_path(&store.root).display()
            );
            Ok(())
        }
        Command::Schema => {
            let out = serde_json::json!({
                "name": "fundry",
                "version": env!("CARGO_PKG_VERSION"),
                "subsystems": [
                    core::broker::schema(),
                    users::schema(),
                    lifecycle::schema(),
                    reward::schema(),
                    pledge::schema(),
                    candidature::schema(),
                    comment::schema(),
                ],
            });
            println!("{}", serde_json::to_string_pretty(&out).unwrap());
            Ok(())
        }
        Command::User(user_cli) => {
            let ctx = EngineCtx::standard(&store)?;
            users::run_user_cli(&store, &ctx, user_cli)
        }
        Command::Project(project_cli) => {
            let ctx = EngineCtx::standard(&store)?;
            lifecycle::run_project_cli(&store, &ctx, project_cli)
        }
        Command::Reward(reward_cli) => {
            let ctx = EngineCtx::standard(&store)?;
            reward::run_reward_cli(&store, &ctx, reward_cli)
        }
        Command::Pledge(pledge_cli) => {
            let ctx = EngineCtx::standard(&store)?;
            pledge::run_pledge_cli(&store, &ctx, pledge_cli)
        }
        Command::Role(role_cli) => {
            let ctx = EngineCtx::standard(&store)?;
            candidature::run_role_cli(&store, &ctx, role_cli)
        }
        Command::Candidature(candidature_cli) => {
            let ctx = EngineCtx::standard(&store)?;
            candidature::run_candidature_cli(&store, &ctx, candidature_cli)
        }
        Command::Comment(comment_cli) => {
            let ctx = EngineCtx::standard(&store)?;
            comment::run_comment_cli(&store, &ctx, comment_cli)
        }
    }
}
