//! Project lifecycle state machine.
//!
//! States run `draft -> in_review -> published -> closed`, with a
//! `draft` re-entry when a reviewer rejects. Every transition checks the
//! acting identity and the source state inside the same transaction that
//! flips the row, so a denied actor or wrong-state call leaves nothing
//! behind. Each successful transition emits an audit event carrying the
//! before/after states and the actor.

use crate::core::auth::Authorizer;
use crate::core::broker::DbBroker;
use crate::core::cache::{self, EntityCache};
use crate::core::db;
use crate::core::error::FundryError;
use crate::core::notify;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::engine::{users, EngineCtx};
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProjectKind {
    Hardware,
    Software,
}

impl ProjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectKind::Hardware => "hardware",
            ProjectKind::Software => "software",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProjectState {
    Draft,
    InReview,
    Published,
    Closed,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Draft => "draft",
            ProjectState::InReview => "in_review",
            ProjectState::Published => "published",
            ProjectState::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ProjectState::Draft),
            "in_review" => Some(ProjectState::InReview),
            "published" => Some(ProjectState::Published),
            "closed" => Some(ProjectState::Closed),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub kind: String,
    pub title: String,
    pub description: String,
    pub cover_asset: Option<String>,
    pub goal: i64,
    pub raised_amount: i64,
    pub deadline: Option<i64>,
    pub state: String,
    pub rejection_reason: Option<String>,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Allow-listed patch for draft edits. Only these fields can ever be
/// updated from caller input; there is no map-driven column dispatch.
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub goal: Option<i64>,
    pub deadline: Option<i64>,
    pub cover_asset: Option<String>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.goal.is_none()
            && self.deadline.is_none()
            && self.cover_asset.is_none()
    }
}

pub fn create_project(
    store: &Store,
    ctx: &EngineCtx,
    owner_id: &str,
    kind: ProjectKind,
    title: &str,
    description: &str,
    goal: i64,
    deadline: Option<i64>,
    cover_asset: Option<&str>,
) -> Result<Project, FundryError> {
    let mut problems = Vec::new();
    if title.trim().is_empty() {
        problems.push("title: required".to_string());
    }
    if goal < 0 {
        problems.push("goal: must not be negative".to_string());
    }
    if !problems.is_empty() {
        return Err(FundryError::Validation(problems));
    }

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let project = broker.with_txn(&db_path, owner_id, "project.create", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        users::require_user(conn, owner_id)?;
        let project_id = time::new_prefixed_id("PRJ");
        let ts = time::now_epoch_z();
        conn.execute(
            "INSERT INTO projects(id, owner_id, kind, title, description, cover_asset, goal, raised_amount, deadline, state, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, 'draft', ?9, ?10)",
            rusqlite::params![
                project_id,
                owner_id,
                kind.as_str(),
                title,
                description,
                cover_asset,
                goal,
                deadline,
                ts,
                ts
            ],
        )?;
        fetch_project(conn, &project_id)
    })?;

    notify::emit_best_effort(
        ctx.sink.as_ref(),
        "project_created",
        &project.id,
        serde_json::json!({ "actor": owner_id, "kind": kind.as_str() }),
    );
    Ok(project)
}

/// Apply a draft edit. Owner-only; any other state refuses the patch.
pub fn update_project(
    store: &Store,
    ctx: &EngineCtx,
    actor: &str,
    project_id: &str,
    patch: &ProjectPatch,
) -> Result<Project, FundryError> {
    if patch.is_empty() {
        return Err(FundryError::invalid("patch: no fields to update"));
    }
    if let Some(goal) = patch.goal {
        if goal < 0 {
            return Err(FundryError::invalid("goal: must not be negative"));
        }
    }

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let project = broker.with_txn(&db_path, actor, "project.update", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let current = fetch_project(conn, project_id)?;
        if !ctx.authorizer.is_project_owner(conn, actor, project_id)? {
            return Err(FundryError::Authorization(format!(
                "only the owner may edit project {}",
                project_id
            )));
        }
        if current.state != "draft" {
            return Err(FundryError::invalid(format!(
                "cannot edit project in state '{}'; edits require 'draft'",
                current.state
            )));
        }

        let ts = time::now_epoch_z();
        conn.execute(
            "UPDATE projects
             SET title = ?1, description = ?2, goal = ?3, deadline = ?4, cover_asset = ?5, updated_at = ?6
             WHERE id = ?7",
            rusqlite::params![
                patch.title.as_deref().unwrap_or(&current.title),
                patch.description.as_deref().unwrap_or(&current.description),
                patch.goal.unwrap_or(current.goal),
                patch.deadline.or(current.deadline),
                patch.cover_asset.as_deref().or(current.cover_asset.as_deref()),
                ts,
                project_id
            ],
        )?;
        fetch_project(conn, project_id)
    })?;

    ctx.cache.invalidate(&cache::project_key(project_id));
    Ok(project)
}

/// Owner submits a draft for review. All field checks are aggregated
/// into one validation failure so the owner sees every problem at once.
pub fn submit_for_review(
    store: &Store,
    ctx: &EngineCtx,
    actor: &str,
    project_id: &str,
) -> Result<Project, FundryError> {
    transition(
        store,
        ctx,
        actor,
        project_id,
        "project.submit_for_review",
        "project_submitted",
        None,
        |conn, project, authz| {
            if !authz.is_project_owner(conn, actor, &project.id)? {
                return Err(FundryError::Authorization(format!(
                    "only the owner may submit project {} for review",
                    project.id
                )));
            }
            if project.state != "draft" {
                return Err(FundryError::invalid(format!(
                    "cannot submit from state '{}', requires 'draft'",
                    project.state
                )));
            }

            let mut problems = Vec::new();
            if project.title.trim().is_empty() {
                problems.push("title: required".to_string());
            }
            if project.description.trim().is_empty() {
                problems.push("description: required".to_string());
            }
            if project.goal <= 0 {
                problems.push("goal: must be positive".to_string());
            }
            if project
                .cover_asset
                .as_deref()
                .map(|c| c.trim().is_empty())
                .unwrap_or(true)
            {
                problems.push("cover_asset: required".to_string());
            }
            match project.deadline {
                None => problems.push("deadline: required".to_string()),
                Some(d) if d <= time::now_unix_secs() => {
                    problems.push("deadline: must be strictly in the future".to_string())
                }
                Some(_) => {}
            }
            if !problems.is_empty() {
                return Err(FundryError::Validation(problems));
            }

            let ts = time::now_epoch_z();
            conn.execute(
                "UPDATE projects SET state = 'in_review', rejection_reason = NULL, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![ts, project.id],
            )?;
            Ok(())
        },
    )
}

/// Administrator approves a review: `in_review -> published`, stamping
/// the campaign start time.
pub fn approve(
    store: &Store,
    ctx: &EngineCtx,
    admin: &str,
    project_id: &str,
) -> Result<Project, FundryError> {
    transition(
        store,
        ctx,
        admin,
        project_id,
        "project.approve",
        "project_approved",
        None,
        |conn, project, authz| {
            if !authz.is_admin(conn, admin)? {
                return Err(FundryError::Authorization(format!(
                    "only an administrator may approve project {}",
                    project.id
                )));
            }
            if project.state != "in_review" {
                return Err(FundryError::invalid(format!(
                    "cannot approve from state '{}', requires 'in_review'",
                    project.state
                )));
            }
            let ts = time::now_epoch_z();
            conn.execute(
                "UPDATE projects SET state = 'published', published_at = ?1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![ts, project.id],
            )?;
            Ok(())
        },
    )
}

/// Administrator rejects a review: `in_review -> draft`, recording a
/// non-empty reason for the owner.
pub fn reject(
    store: &Store,
    ctx: &EngineCtx,
    admin: &str,
    project_id: &str,
    reason: &str,
) -> Result<Project, FundryError> {
    transition(
        store,
        ctx,
        admin,
        project_id,
        "project.reject",
        "project_rejected",
        Some(reason),
        |conn, project, authz| {
            if !authz.is_admin(conn, admin)? {
                return Err(FundryError::Authorization(format!(
                    "only an administrator may reject project {}",
                    project.id
                )));
            }
            if project.state != "in_review" {
                return Err(FundryError::invalid(format!(
                    "cannot reject from state '{}', requires 'in_review'",
                    project.state
                )));
            }
            if reason.trim().is_empty() {
                return Err(FundryError::invalid("reason: required"));
            }
            let ts = time::now_epoch_z();
            conn.execute(
                "UPDATE projects SET state = 'draft', rejection_reason = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![reason, ts, project.id],
            )?;
            Ok(())
        },
    )
}

/// Close a project. Owner or administrator, from any state except
/// `closed`; a second close fails `AlreadyClosed`. Terminal: pledges and
/// applications freeze, comments stay open.
pub fn close(
    store: &Store,
    ctx: &EngineCtx,
    actor: &str,
    project_id: &str,
) -> Result<Project, FundryError> {
    transition(
        store,
        ctx,
        actor,
        project_id,
        "project.close",
        "project_closed",
        None,
        |conn, project, authz| {
            let permitted = authz.is_project_owner(conn, actor, &project.id)?
                || authz.is_admin(conn, actor)?;
            if !permitted {
                return Err(FundryError::Authorization(format!(
                    "only the owner or an administrator may close project {}",
                    project.id
                )));
            }
            if project.state == "closed" {
                return Err(FundryError::AlreadyClosed(project.id.clone()));
            }
            let ts = time::now_epoch_z();
            conn.execute(
                "UPDATE projects SET state = 'closed', updated_at = ?1 WHERE id = ?2",
                rusqlite::params![ts, project.id],
            )?;
            Ok(())
        },
    )
}

/// Shared transition shell: load, check, mutate in one transaction, then
/// invalidate the cache key and emit the audit event.
fn transition<F>(
    store: &Store,
    ctx: &EngineCtx,
    actor: &str,
    project_id: &str,
    op_name: &str,
    event_kind: &str,
    reason: Option<&str>,
    apply: F,
) -> Result<Project, FundryError>
where
    F: Fn(&Connection, &Project, &dyn crate::core::auth::Authorizer) -> Result<(), FundryError>,
{
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);

    let (before, after) = broker.with_txn(&db_path, actor, op_name, |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let project = fetch_project(conn, project_id)?;
        apply(conn, &project, ctx.authorizer.as_ref())?;
        let updated = fetch_project(conn, project_id)?;
        Ok((project.state.clone(), updated))
    })?;

    ctx.cache.invalidate(&cache::project_key(project_id));

    let mut payload = serde_json::json!({
        "from": before,
        "to": after.state,
        "actor": actor,
    });
    if let (Some(obj), Some(r)) = (payload.as_object_mut(), reason) {
        obj.insert("reason".to_string(), serde_json::json!(r));
    }
    notify::emit_best_effort(ctx.sink.as_ref(), event_kind, project_id, payload);

    Ok(after)
}

/// Read-through cached project lookup for display paths. Write paths
/// never consult this; they load inside their own transaction.
pub fn get_project(
    store: &Store,
    ctx: &EngineCtx,
    project_id: &str,
) -> Result<Option<Project>, FundryError> {
    let key = cache::project_key(project_id);
    if let Some(hit) = ctx.cache.get(&key) {
        if let Ok(project) = serde_json::from_str::<Project>(&hit) {
            return Ok(Some(project));
        }
    }

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let found = broker.with_conn(&db_path, "fundry", "project.get", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        // Absence is None; storage failures surface.
        match fetch_project(conn, project_id) {
            Ok(project) => Ok(Some(project)),
            Err(FundryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    })?;

    if let Some(ref project) = found {
        if let Ok(json) = serde_json::to_string(project) {
            ctx.cache.put(&key, json);
        }
    }
    Ok(found)
}

pub fn list_projects(
    store: &Store,
    state: Option<ProjectState>,
) -> Result<Vec<Project>, FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_conn(&db_path, "fundry", "project.list", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let mut query = String::from(
            "SELECT id, owner_id, kind, title, description, cover_asset, goal, raised_amount,
                    deadline, state, rejection_reason, published_at, created_at, updated_at
             FROM projects",
        );
        if state.is_some() {
            query.push_str(" WHERE state = ?1");
        }
        query.push_str(" ORDER BY created_at ASC");

        let mut stmt = conn.prepare(&query)?;
        let mut out = Vec::new();
        let mut push_rows = |rows: &mut rusqlite::Rows<'_>| -> Result<(), FundryError> {
            while let Some(row) = rows.next()? {
                out.push(project_from_row(row)?);
            }
            Ok(())
        };
        match state {
            Some(s) => {
                let mut rows = stmt.query(rusqlite::params![s.as_str()])?;
                push_rows(&mut rows)?;
            }
            None => {
                let mut rows = stmt.query([])?;
                push_rows(&mut rows)?;
            }
        }
        Ok(out)
    })
}

/// Load a project row or fail `NotFound`. Callers inside a transaction
/// see the transaction's view.
pub(crate) fn fetch_project(conn: &Connection, project_id: &str) -> Result<Project, FundryError> {
    conn.query_row(
        "SELECT id, owner_id, kind, title, description, cover_asset, goal, raised_amount,
                deadline, state, rejection_reason, published_at, created_at, updated_at
         FROM projects WHERE id = ?1",
        rusqlite::params![project_id],
        |row| {
            Ok(Project {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                kind: row.get(2)?,
                title: row.get(3)?,
                description: row.get(4)?,
                cover_asset: row.get(5)?,
                goal: row.get(6)?,
                raised_amount: row.get(7)?,
                deadline: row.get(8)?,
                state: row.get(9)?,
                rejection_reason: row.get(10)?,
                published_at: row.get(11)?,
                created_at: row.get(12)?,
                updated_at: row.get(13)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| FundryError::NotFound(format!("project {}", project_id)))
}

fn project_from_row(row: &rusqlite::Row<'_>) -> Result<Project, FundryError> {
    Ok(Project {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        cover_asset: row.get(5)?,
        goal: row.get(6)?,
        raised_amount: row.get(7)?,
        deadline: row.get(8)?,
        state: row.get(9)?,
        rejection_reason: row.get(10)?,
        published_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "project",
        "version": "0.1.0",
        "description": "Project lifecycle state machine (draft/in_review/published/closed)",
        "commands": [
            { "name": "create", "description": "Create a draft project" },
            { "name": "update", "description": "Edit a draft (allow-listed fields)" },
            { "name": "submit", "description": "Submit a draft for review" },
            { "name": "approve", "description": "Approve a review (admin)" },
            { "name": "reject", "description": "Reject a review with a reason (admin)" },
            { "name": "close", "description": "Close a project (terminal)" },
            { "name": "get", "description": "Show one project" },
            { "name": "list", "description": "List projects" }
        ],
        "storage": ["ledger.db: projects"]
    })
}

#[derive(Parser, Debug)]
#[clap(name = "project", about = "Create projects and drive their lifecycle.")]
pub struct ProjectCli {
    #[clap(subcommand)]
    command: ProjectCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create a draft project.
    Create {
        #[clap(value_name = "TITLE")]
        title: String,
        #[clap(long)]
        owner: String,
        #[clap(long, value_enum)]
        kind: ProjectKind,
        #[clap(long, default_value = "")]
        description: String,
        /// Funding goal in cents.
        #[clap(long, default_value_t = 0)]
        goal: i64,
        /// Campaign deadline as epoch seconds.
        #[clap(long)]
        deadline: Option<i64>,
        #[clap(long)]
        cover_asset: Option<String>,
    },
    /// Edit a draft project.
    Update {
        #[clap(long)]
        id: String,
        #[clap(long)]
        actor: String,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        description: Option<String>,
        #[clap(long)]
        goal: Option<i64>,
        #[clap(long)]
        deadline: Option<i64>,
        #[clap(long)]
        cover_asset: Option<String>,
    },
    /// Submit a draft for review.
    Submit {
        #[clap(long)]
        id: String,
        #[clap(long)]
        actor: String,
    },
    /// Approve a review (administrator).
    Approve {
        #[clap(long)]
        id: String,
        #[clap(long)]
        admin: String,
    },
    /// Reject a review back to draft (administrator).
    Reject {
        #[clap(long)]
        id: String,
        #[clap(long)]
        admin: String,
        #[clap(long)]
        reason: String,
    },
    /// Close a project (terminal).
    Close {
        #[clap(long)]
        id: String,
        #[clap(long)]
        actor: String,
    },
    /// Show one project.
    Get {
        #[clap(long)]
        id: String,
    },
    /// List projects, optionally by state.
    List {
        #[clap(long, value_enum)]
        state: Option<ProjectState>,
    },
    /// Print subsystem schema metadata.
    Schema,
}

pub fn run_project_cli(store: &Store, ctx: &EngineCtx, cli: ProjectCli) -> Result<(), FundryError> {
    let out = match &cli.command {
        ProjectCommand::Create {
            title,
            owner,
            kind,
            description,
            goal,
            deadline,
            cover_asset,
        } => {
            let project = create_project(
                store,
                ctx,
                owner,
                *kind,
                title,
                description,
                *goal,
                *deadline,
                cover_asset.as_deref(),
            )?;
            envelope("project.create", project)
        }
        ProjectCommand::Update {
            id,
            actor,
            title,
            description,
            goal,
            deadline,
            cover_asset,
        } => {
            let patch = ProjectPatch {
                title: title.clone(),
                description: description.clone(),
                goal: *goal,
                deadline: *deadline,
                cover_asset: cover_asset.clone(),
            };
            envelope("project.update", update_project(store, ctx, actor, id, &patch)?)
        }
        ProjectCommand::Submit { id, actor } => {
            envelope("project.submit", submit_for_review(store, ctx, actor, id)?)
        }
        ProjectCommand::Approve { id, admin } => {
            envelope("project.approve", approve(store, ctx, admin, id)?)
        }
        ProjectCommand::Reject { id, admin, reason } => {
            envelope("project.reject", reject(store, ctx, admin, id, reason)?)
        }
        ProjectCommand::Close { id, actor } => {
            envelope("project.close", close(store, ctx, actor, id)?)
        }
        ProjectCommand::Get { id } => {
            let project = get_project(store, ctx, id)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "project.get",
                "status": if project.is_some() { "ok" } else { "not_found" },
                "project": project,
            })
        }
        ProjectCommand::List { state } => {
            let items = list_projects(store, *state)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "project.list",
                "status": "ok",
                "items": items,
            })
        }
        ProjectCommand::Schema => schema(),
    };
    println!("{}", serde_json::to_string_pretty(&out).unwrap());
    Ok(())
}

fn envelope(cmd: &str, project: Project) -> serde_json::Value {
    serde_json::json!({
        "ts": time::now_epoch_z(),
        "cmd": cmd,
        "status": "ok",
        "project": project,
    })
}
