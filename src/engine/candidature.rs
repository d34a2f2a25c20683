//! Candidature matcher: software-project roles, skill-matched
//! applications, and headcount tracking.
//!
//! Headcount is a contended counter like reward capacity: the accept
//! path re-checks it at decision time through a guarded increment inside
//! the same transaction that flips the application status, so two
//! acceptances can never overfill a role.

use crate::core::auth::Authorizer;
use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::FundryError;
use crate::core::notify;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::engine::{lifecycle, users, EngineCtx};
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Role {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub headcount: i64,
    pub filled_count: i64,
    pub created_at: String,
    #[serde(default)]
    pub skills: Vec<RoleSkill>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoleSkill {
    pub skill: String,
    pub min_level: i64,
    /// Optional skills are informational and never block an application.
    pub required: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Application {
    pub id: String,
    pub role_id: String,
    pub applicant_id: String,
    pub motivation: String,
    pub status: String,
    pub reviewer_id: Option<String>,
    pub decided_at: Option<i64>,
    pub created_at: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum DecideOutcome {
    Accept,
    Reject,
}

/// Open a contributor role on a software project. Owner-only; skill
/// levels must sit within the configured bounds.
pub fn add_role(
    store: &Store,
    ctx: &EngineCtx,
    actor: &str,
    project_id: &str,
    title: &str,
    headcount: i64,
    required: &[(String, i64)],
    optional: &[(String, i64)],
) -> Result<Role, FundryError> {
    let mut problems = Vec::new();
    if title.trim().is_empty() {
        problems.push("title: required".to_string());
    }
    if headcount <= 0 {
        problems.push("headcount: must be positive".to_string());
    }
    let (lo, hi) = (ctx.config.skill_level_min, ctx.config.skill_level_max);
    for (skill, level) in required.iter().chain(optional.iter()) {
        if skill.trim().is_empty() {
            problems.push("skill: empty name".to_string());
        }
        if *level < lo || *level > hi {
            problems.push(format!(
                "{}: level {} outside bounds {}..={}",
                skill, level, lo, hi
            ));
        }
    }
    if !problems.is_empty() {
        return Err(FundryError::Validation(problems));
    }

    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let role = broker.with_txn(&db_path, actor, "role.add", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let project = lifecycle::fetch_project(conn, project_id)?;
        let role_id = time::new_prefixed_id("ROL");
        let ts = time::now_epoch_z();
        if !ctx.authorizer.is_project_owner(conn, actor, project_id)? {
            return Err(FundryError::Authorization(format!(
                "only the owner may add roles to project {}",
                project_id
            )));
        }
        if project.kind != "software" {
            return Err(FundryError::invalid(format!(
                "project {} is '{}'; roles exist only on software projects",
                project_id, project.kind
            )));
        }
        if project.state == "closed" {
            return Err(FundryError::AlreadyClosed(project_id.to_string()));
        }
        conn.execute(
            "INSERT INTO roles(id, project_id, title, headcount, filled_count, created_at)
             VALUES(?1, ?2, ?3, ?4, 0, ?5)",
            rusqlite::params![role_id, project_id, title, headcount, ts],
        )?;
        for (skill, level) in required {
            conn.execute(
                "INSERT INTO role_skills(role_id, skill, min_level, required) VALUES(?1, ?2, ?3, 1)",
                rusqlite::params![role_id, skill, level],
            )?;
        }
        for (skill, level) in optional {
            conn.execute(
                "INSERT INTO role_skills(role_id, skill, min_level, required) VALUES(?1, ?2, ?3, 0)",
                rusqlite::params![role_id, skill, level],
            )?;
        }
        fetch_role(conn, &role_id)?
            .ok_or_else(|| FundryError::NotFound(format!("role {}", role_id)))
    })?;

    Ok(role)
}

pub fn get_role(store: &Store, role_id: &str) -> Result<Option<Role>, FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_conn(&db_path, "fundry", "role.get", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        fetch_role(conn, role_id)
    })
}

/// Submit an application for a role on a published project.
///
/// The skill check is aggregate: the applicant learns every unmet
/// required skill in one `SkillMismatch`, not just the first.
pub fn apply(
    store: &Store,
    ctx: &EngineCtx,
    role_id: &str,
    applicant_id: &str,
    motivation: &str,
) -> Result<Application, FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let application = broker.with_txn(&db_path, applicant_id, "candidature.apply", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let role = fetch_role(conn, role_id)?
            .ok_or_else(|| FundryError::NotFound(format!("role {}", role_id)))?;
        let project = lifecycle::fetch_project(conn, &role.project_id)?;
        if project.state != "published" {
            return Err(FundryError::NotFound(format!(
                "role {} is not open for applications",
                role_id
            )));
        }
        users::require_user(conn, applicant_id)?;

        let duplicate: Option<String> = conn
            .query_row(
                "SELECT id FROM applications WHERE role_id = ?1 AND applicant_id = ?2",
                rusqlite::params![role_id, applicant_id],
                |row| row.get(0),
            )
            .optional()?;
        if duplicate.is_some() {
            return Err(FundryError::DuplicateApplication);
        }
        if role.filled_count >= role.headcount {
            return Err(FundryError::RoleFull(role_id.to_string()));
        }

        let held = applicant_skills(conn, applicant_id)?;
        let mut unmet = Vec::new();
        for req in role.skills.iter().filter(|s| s.required) {
            match held.get(&req.skill) {
                Some(level) if *level >= req.min_level => {}
                Some(level) => unmet.push(format!(
                    "{}: requires level {}, has {}",
                    req.skill, req.min_level, level
                )),
                None => unmet.push(format!(
                    "{}: requires level {}, not held",
                    req.skill, req.min_level
                )),
            }
        }
        if !unmet.is_empty() {
            return Err(FundryError::SkillMismatch(unmet));
        }

        let application_id = time::new_prefixed_id("APP");
        let ts = time::now_epoch_z();
        // The UNIQUE(role_id, applicant_id) constraint backs the
        // duplicate pre-check inside the same transaction.
        let inserted = conn.execute(
            "INSERT INTO applications(id, role_id, applicant_id, motivation, status, created_at)
             VALUES(?1, ?2, ?3, ?4, 'pending', ?5)",
            rusqlite::params![application_id, role_id, applicant_id, motivation, ts],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(FundryError::DuplicateApplication);
            }
            Err(e) => return Err(e.into()),
        }
        fetch_application(conn, &application_id)?
            .ok_or_else(|| FundryError::NotFound(format!("application {}", application_id)))
    })?;

    notify::emit_best_effort(
        ctx.sink.as_ref(),
        "application_submitted",
        role_id,
        serde_json::json!({
            "application_id": application.id,
            "applicant_id": applicant_id,
        }),
    );
    Ok(application)
}

/// Decide a pending application. Project-owner-only; terminal either
/// way. Accepting re-checks headcount at decision time, so an
/// application that was viable at submit can still fail `RoleFull` here.
pub fn decide(
    store: &Store,
    ctx: &EngineCtx,
    application_id: &str,
    reviewer_id: &str,
    outcome: DecideOutcome,
) -> Result<Application, FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    let application = broker.with_txn(&db_path, reviewer_id, "candidature.decide", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let app = fetch_application(conn, application_id)?
            .ok_or_else(|| FundryError::NotFound(format!("application {}", application_id)))?;
        let role = fetch_role(conn, &app.role_id)?
            .ok_or_else(|| FundryError::NotFound(format!("role {}", app.role_id)))?;
        let project = lifecycle::fetch_project(conn, &role.project_id)?;

        if !ctx
            .authorizer
            .is_project_owner(conn, reviewer_id, &project.id)?
        {
            return Err(FundryError::Authorization(format!(
                "only the project owner may decide application {}",
                application_id
            )));
        }
        if project.state == "closed" {
            return Err(FundryError::ProjectNotOpen(format!(
                "project {} is closed; applications are frozen",
                project.id
            )));
        }
        if app.status != "pending" {
            return Err(FundryError::AlreadyDecided);
        }

        let decided_at = time::now_unix_secs();
        match outcome {
            DecideOutcome::Accept => {
                let changed = conn.execute(
                    "UPDATE roles SET filled_count = filled_count + 1
                     WHERE id = ?1 AND filled_count < headcount",
                    rusqlite::params![app.role_id],
                )?;
                if changed == 0 {
                    return Err(FundryError::RoleFull(app.role_id.clone()));
                }
                conn.execute(
                    "UPDATE applications SET status = 'accepted', reviewer_id = ?1, decided_at = ?2
                     WHERE id = ?3",
                    rusqlite::params![reviewer_id, decided_at, application_id],
                )?;
            }
            DecideOutcome::Reject => {
                conn.execute(
                    "UPDATE applications SET status = 'rejected', reviewer_id = ?1, decided_at = ?2
                     WHERE id = ?3",
                    rusqlite::params![reviewer_id, decided_at, application_id],
                )?;
            }
        }
        fetch_application(conn, application_id)?
            .ok_or_else(|| FundryError::NotFound(format!("application {}", application_id)))
    })?;

    let kind = match outcome {
        DecideOutcome::Accept => "application_accepted",
        DecideOutcome::Reject => "application_rejected",
    };
    notify::emit_best_effort(
        ctx.sink.as_ref(),
        kind,
        &application.id,
        serde_json::json!({
            "role_id": application.role_id,
            "applicant_id": application.applicant_id,
            "reviewer_id": reviewer_id,
        }),
    );
    Ok(application)
}

pub fn list_applications(store: &Store, role_id: &str) -> Result<Vec<Application>, FundryError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::ledger_db_path(&store.root);
    broker.with_conn(&db_path, "fundry", "candidature.list", |conn| {
        schemas::ensure_ledger_schema(conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, role_id, applicant_id, motivation, status, reviewer_id, decided_at, created_at
             FROM applications WHERE role_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query(rusqlite::params![role_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(application_from_row(row)?);
        }
        Ok(out)
    })
}

fn applicant_skills(
    conn: &Connection,
    applicant_id: &str,
) -> Result<HashMap<String, i64>, FundryError> {
    let mut stmt = conn.prepare("SELECT skill, level FROM user_skills WHERE user_id = ?1")?;
    let mut rows = stmt.query(rusqlite::params![applicant_id])?;
    let mut held = HashMap::new();
    while let Some(row) = rows.next()? {
        held.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)?);
    }
    Ok(held)
}

pub(crate) fn fetch_role(conn: &Connection, role_id: &str) -> Result<Option<Role>, FundryError> {
    let row = conn
        .query_row(
            "SELECT id, project_id, title, headcount, filled_count, created_at
             FROM roles WHERE id = ?1",
            rusqlite::params![role_id],
            |row| {
                Ok(Role {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    title: row.get(2)?,
                    headcount: row.get(3)?,
                    filled_count: row.get(4)?,
                    created_at: row.get(5)?,
                    skills: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut role) = row else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT skill, min_level, required FROM role_skills WHERE role_id = ?1 ORDER BY skill ASC",
    )?;
    let mut rows = stmt.query(rusqlite::params![role_id])?;
    while let Some(row) = rows.next()? {
        role.skills.push(RoleSkill {
            skill: row.get(0)?,
            min_level: row.get(1)?,
            required: row.get::<_, i64>(2)? != 0,
        });
    }
    Ok(Some(role))
}

fn fetch_application(
    conn: &Connection,
    application_id: &str,
) -> Result<Option<Application>, FundryError> {
    Ok(conn
        .query_row(
            "SELECT id, role_id, applicant_id, motivation, status, reviewer_id, decided_at, created_at
             FROM applications WHERE id = ?1",
            rusqlite::params![application_id],
            |row| {
                Ok(Application {
                    id: row.get(0)?,
                    role_id: row.get(1)?,
                    applicant_id: row.get(2)?,
                    motivation: row.get(3)?,
                    status: row.get(4)?,
                    reviewer_id: row.get(5)?,
                    decided_at: row.get(6)?,
                    created_at: row.get(7)?,
                })
            },
        )
        .optional()?)
}

fn application_from_row(row: &rusqlite::Row<'_>) -> Result<Application, FundryError> {
    Ok(Application {
        id: row.get(0)?,
        role_id: row.get(1)?,
        applicant_id: row.get(2)?,
        motivation: row.get(3)?,
        status: row.get(4)?,
        reviewer_id: row.get(5)?,
        decided_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Parse a `NAME:LEVEL` skill spec from the CLI.
pub fn parse_skill_spec(spec: &str) -> Result<(String, i64), FundryError> {
    let Some((name, level)) = spec.rsplit_once(':') else {
        return Err(FundryError::invalid(format!(
            "skill spec '{}' must be NAME:LEVEL",
            spec
        )));
    };
    let level: i64 = level.parse().map_err(|_| {
        FundryError::invalid(format!("skill spec '{}' has a non-numeric level", spec))
    })?;
    Ok((name.to_string(), level))
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "candidature",
        "version": "0.1.0",
        "description": "Skill-matched applications for software-project roles",
        "commands": [
            { "name": "role add", "description": "Open a role with required skills" },
            { "name": "role get", "description": "Show a role with headcount" },
            { "name": "apply", "description": "Apply to a role" },
            { "name": "decide", "description": "Accept or reject an application (owner)" },
            { "name": "list", "description": "List a role's applications" }
        ],
        "storage": ["ledger.db: roles, role_skills, applications"]
    })
}

#[derive(Parser, Debug)]
#[clap(name = "role", about = "Open contributor roles on software projects.")]
pub struct RoleCli {
    #[clap(subcommand)]
    command: RoleCommand,
}

#[derive(Subcommand, Debug)]
pub enum RoleCommand {
    /// Open a role.
    Add {
        #[clap(value_name = "TITLE")]
        title: String,
        #[clap(long)]
        project: String,
        #[clap(long)]
        actor: String,
        #[clap(long, default_value_t = 1)]
        headcount: i64,
        /// Required skill as NAME:LEVEL (repeatable).
        #[clap(long = "require")]
        require: Vec<String>,
        /// Optional skill as NAME:LEVEL (repeatable).
        #[clap(long = "optional")]
        optional: Vec<String>,
    },
    /// Show a role.
    Get {
        #[clap(long)]
        id: String,
    },
    /// Print subsystem schema metadata.
    Schema,
}

pub fn run_role_cli(store: &Store, ctx: &EngineCtx, cli: RoleCli) -> Result<(), FundryError> {
    let out = match &cli.command {
        RoleCommand::Add {
            title,
            project,
            actor,
            headcount,
            require,
            optional,
        } => {
            let required: Vec<(String, i64)> = require
                .iter()
                .map(|s| parse_skill_spec(s))
                .collect::<Result<_, _>>()?;
            let informational: Vec<(String, i64)> = optional
                .iter()
                .map(|s| parse_skill_spec(s))
                .collect::<Result<_, _>>()?;
            let role = add_role(
                store,
                ctx,
                actor,
                project,
                title,
                *headcount,
                &required,
                &informational,
            )?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "role.add",
                "status": "ok",
                "role": role,
            })
        }
        RoleCommand::Get { id } => {
            let role = get_role(store, id)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "role.get",
                "status": if role.is_some() { "ok" } else { "not_found" },
                "role": role,
            })
        }
        RoleCommand::Schema => schema(),
    };
    println!("{}", serde_json::to_string_pretty(&out).unwrap());
    Ok(())
}

#[derive(Parser, Debug)]
#[clap(name = "candidature", about = "Apply for roles and decide applications.")]
pub struct CandidatureCli {
    #[clap(subcommand)]
    command: CandidatureCommand,
}

#[derive(Subcommand, Debug)]
pub enum CandidatureCommand {
    /// Apply for a role.
    Apply {
        #[clap(long)]
        role: String,
        #[clap(long)]
        applicant: String,
        #[clap(long, default_value = "")]
        motivation: String,
    },
    /// Accept or reject a pending application.
    Decide {
        #[clap(long)]
        id: String,
        #[clap(long)]
        reviewer: String,
        #[clap(long, value_enum)]
        outcome: DecideOutcome,
    },
    /// List a role's applications.
    List {
        #[clap(long)]
        role: String,
    },
    /// Print subsystem schema metadata.
    Schema,
}

pub fn run_candidature_cli(
    store: &Store,
    ctx: &EngineCtx,
    cli: CandidatureCli,
) -> Result<(), FundryError> {
    let out = match &cli.command {
        CandidatureCommand::Apply {
            role,
            applicant,
            motivation,
        } => {
            let application = apply(store, ctx, role, applicant, motivation)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "candidature.apply",
                "status": "ok",
                "application": application,
            })
        }
        CandidatureCommand::Decide {
            id,
            reviewer,
            outcome,
        } => {
            let application = decide(store, ctx, id, reviewer, *outcome)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "candidature.decide",
                "status": "ok",
                "application": application,
            })
        }
        CandidatureCommand::List { role } => {
            let items = list_applications(store, role)?;
            serde_json::json!({
                "ts": time::now_epoch_z(),
                "cmd": "candidature.list",
                "status": "ok",
                "items": items,
            })
        }
        CandidatureCommand::Schema => schema(),
    };
    println!("{}", serde_json::to_string_pretty(&out).unwrap());
    Ok(())
}
