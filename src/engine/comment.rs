//! Comments and the single-reply invariant.
//!
//! Any user may comment on any project, closed ones included (historical
//! discussion stays open). A comment takes at most one reply, authored
//! only by the project owner; the invariant is enforced at write time by
//! a uniqueness check plus the `UNIQUE(comment_id)` column inside the
//! insert transaction.

use crate::core::auth::Authorizer;
use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::FundryError;
use crate::core::notify;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::engine::{lifecycle, users, EngineCtx};
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Comment {
    pub id: String,
    pub project_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: String,
    #[serde(default)]
    pub reply: Option<Reply>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Reply {
    pub id: String,
    pub comment_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: String,
}

pub fn post_comment(
    store: &Store,
    ctx: &EngineCtx,
    project_id: &str,
    author_id: &str,
    body: &str,
) -> Result<Comment, FundryError> {
    check_body(body, ctx.config.comment_max_len)?;

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let comment = broker.with_txn(&db_path, author_id, "comment.post", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        // No state restriction: even closed projects accept comments.
        lifecycle::fetch_project(conn, project_id)?;
        users::require_user(conn, author_id)?;

        let comment_id = time::new_prefixed_id("CMT");
        let ts = time::now_epoch_z();
        conn.execute(
            "INSERT INTO comments(id, project_id, author_id, body, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![comment_id, project_id, author_id, body, ts],
        )?;
        Ok(Comment {
            id: comment_id,
            project_id: project_id.to_string(),
            author_id: author_id.to_string(),
            body: body.to_string(),
            created_at: ts,
            reply: None,
        })
    })?;

    notify::emit_best_effort(
        ctx.sink.as_ref(),
        "comment_posted",
        project_id,
        serde_json::json!({ "comment_id": comment.id, "author_id": author_id }),
    );
    Ok(comment)
}

pub fn post_reply(
    store: &Store,
    ctx: &EngineCtx,
    comment_id: &str,
    actor: &str,
    body: &str,
) -> Result<Reply, FundryError> {
    check_body(body, ctx.config.comment_max_len)?;

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let reply = broker.with_txn(&db_path, actor, "comment.reply", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let (project_id, _): (String, String) = conn
            .query_row(
                "SELECT project_id, author_id FROM comments WHERE id = ?1",
                rusqlite::params![comment_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| FundryError::NotFound(format!("comment {}", comment_id)))?;

        if !ctx.authorizer.is_project_owner(conn, actor, &project_id)? {
            return Err(FundryError::Authorization(format!(
                "only the project owner may reply to comment {}",
                comment_id
            )));
        }

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM replies WHERE comment_id = ?1",
                rusqlite::params![comment_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(FundryError::DuplicateReply);
        }

        let reply_id = time::new_prefixed_id("RPL");
        let ts = time::now_epoch_z();
        // UNIQUE(comment_id) backs the pre-check inside this transaction.
        let inserted = conn.execute(
            "INSERT INTO replies(id, comment_id, author_id, body, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![reply_id, comment_id, actor, body, ts],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(FundryError::DuplicateReply);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Reply {
            id: reply_id,
            comment_id: comment_id.to_string(),
            author_id: actor.to_string(),
            body: body.to_string(),
            created_at: ts,
        })
    })?;

    notify::emit_best_effort(
        ctx.sink.as_ref(),
        "comment_replied",
        comment_id,
        serde_json::json!({ "reply_id": reply.id, "author_id": actor }),
    );
    Ok(reply)
}

/// Comments with their replies, oldest first.
pub fn list_comments(store: &Store, project_id: &str) -> Result<Vec<Comment>, FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_conn(&db_path, "fundry", "comment.list", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, author_id, body, created_at
             FROM comments WHERE project_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query(rusqlite::params![project_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let comment_id: String = row.get(0)?;
            let reply = fetch_reply(conn, &comment_id)?;
            out.push(Comment {
                id: comment_id,
                project_id: row.get(1)?,
                author_id: row.get(2)?,
                body: row.get(3)?,
                created_at: row.get(4)?,
                reply,
            });
        }
        Ok(out)
    })
}

fn fetch_reply(conn: &Connection, comment_id: &str) -> Result<Option<Reply>, FundryError> {
    Ok(conn
        .query_row(
            "SELECT id, comment_id, author_id, body, created_at FROM replies WHERE comment_id = ?1",
            rusqlite::params![comment_id],
            |row| {
                Ok(Reply {
                    id: row.get(0)?,
                    comment_id: row.get(1)?,
                    author_id: row.get(2)?,
                    body: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?)
}

fn check_body(body: &str, max_len: usize) -> Result<(), FundryError> {
    if body.trim().is_empty() {
        return Err(FundryError::invalid("body: required"));
    }
    let len = body.chars().count();
    if len > max_len {
        return Err(FundryError::invalid(format!(
            "body: {} characters exceeds the {} limit",
            len, max_len
        )));
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "comment",
        "version": "0.1.0",
        "description": "Project comments with the one-reply-per-comment invariant",
        "commands": [
            { "name": "post", "description": "Comment on a project" },
            { "name": "reply", "description": "Owner reply to a comment (at most one)" },
            { "name": "list", "description": "List comments with replies" }
        ],
        "storage": ["ledger.db: comments, replies"]
    })
}

#[derive(Parser, Debug)]
#[clap(name = "comment", about = "Comment on projects; owners reply once per comment.")]
pub struct CommentCli {
    #[clap(subcommand)]
    command: CommentCommand,
}

#[derive(Subcommand, Debug)]
pub enum CommentCommand {
    /// Post a comment on a project.
    Post {
        #[clap(long)]
        project: String,
        #[clap(long)]
        author: String,
        #[clap(long)]
        body: String,
    },
    /// Reply to a comment (project owner, once).
    Reply {
        #[clap(long)]
        comment: String,
        #[clap(long)]
        actor: String,
        #[clap(long)]
        body: String,
    },
    /// List a project's comments with replies.
    List {
        #[clap(long)]
        project: String,
    },
    /// Print subsystem schema metadata.
    Schema,
}

pub fn run_comment_cli(store: &Store, ctx: &EngineCtx, cli: CommentCli) -> Result<(), FundryError> {
    let out = match &cli.command {
        CommentCommand::Post {
            project,
            author,
            body,
        } => {
            let comment = post_comment(store, ctx, project, author, body)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "comment.post",
                "status": "ok",
                "comment": comment,
            })
        }
        CommentCommand::Reply {
            comment,
            actor,
            body,
        } => {
            let reply = post_reply(store, ctx, comment, actor, body)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "comment.reply",
                "status": "ok",
                "reply": reply,
            })
        }
        CommentCommand::List { project } => {
            let items = list_comments(store, project)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "comment.list",
                "status": "ok",
                "items": items,
            })
        }
        CommentCommand::Schema => schema(),
    };
    println!("{}", serde_json::to_string_pretty(&out).unwrap());
    Ok(())
}
