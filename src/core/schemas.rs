//! Centralized schema definitions for the Fundry ledger database.
//!
//! One SQLite database (`ledger.db`) is the single source of truth for
//! users, projects, rewards, pledges, roles, applications, comments and
//! replies. Cascade rules follow entity ownership: rewards, roles and
//! comments die with their project; pledges and applications are
//! restrict-referenced because they carry audit lifetime.

use rusqlite::Connection;

pub const LEDGER_DB_NAME: &str = "ledger.db";

pub const LEDGER_DB_SCHEMA_USERS: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        is_admin INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
";

pub const LEDGER_DB_SCHEMA_USER_SKILLS: &str = "
    CREATE TABLE IF NOT EXISTS user_skills (
        user_id TEXT NOT NULL,
        skill TEXT NOT NULL,
        level INTEGER NOT NULL,
        PRIMARY KEY(user_id, skill),
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
    )
";

pub const LEDGER_DB_SCHEMA_PROJECTS: &str = "
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        kind TEXT NOT NULL CHECK(kind IN ('hardware','software')),
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        cover_asset TEXT,
        goal INTEGER NOT NULL DEFAULT 0,
        raised_amount INTEGER NOT NULL DEFAULT 0,
        deadline INTEGER,
        state TEXT NOT NULL DEFAULT 'draft'
            CHECK(state IN ('draft','in_review','published','closed')),
        rejection_reason TEXT,
        published_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(owner_id) REFERENCES users(id)
    )
";

pub const LEDGER_DB_SCHEMA_REWARDS: &str = "
    CREATE TABLE IF NOT EXISTS rewards (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        title TEXT NOT NULL,
        minimum INTEGER NOT NULL,
        capacity INTEGER,
        claimed_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
    )
";

pub const LEDGER_DB_SCHEMA_PLEDGES: &str = "
    CREATE TABLE IF NOT EXISTS pledges (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        backer_id TEXT NOT NULL,
        reward_id TEXT,
        amount INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(project_id) REFERENCES projects(id),
        FOREIGN KEY(backer_id) REFERENCES users(id),
        FOREIGN KEY(reward_id) REFERENCES rewards(id)
    )
";
pub const LEDGER_DB_SCHEMA_PLEDGES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_pledges_project ON pledges(project_id)";

pub const LEDGER_DB_SCHEMA_ROLES: &str = "
    CREATE TABLE IF NOT EXISTS roles (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        title TEXT NOT NULL,
        headcount INTEGER NOT NULL,
        filled_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
    )
";

pub const LEDGER_DB_SCHEMA_ROLE_SKILLS: &str = "
    CREATE TABLE IF NOT EXISTS role_skills (
        role_id TEXT NOT NULL,
        skill TEXT NOT NULL,
        min_level INTEGER NOT NULL,
        required INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY(role_id, skill),
        FOREIGN KEY(role_id) REFERENCES roles(id) ON DELETE CASCADE
    )
";

pub const LEDGER_DB_SCHEMA_APPLICATIONS: &str = "
    CREATE TABLE IF NOT EXISTS applications (
        id TEXT PRIMARY KEY,
        role_id TEXT NOT NULL,
        applicant_id TEXT NOT NULL,
        motivation TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK(status IN ('pending','accepted','rejected')),
        reviewer_id TEXT,
        decided_at INTEGER,
        created_at TEXT NOT NULL,
        UNIQUE(role_id, applicant_id),
        FOREIGN KEY(role_id) REFERENCES roles(id),
        FOREIGN KEY(applicant_id) REFERENCES users(id)
    )
";
pub const LEDGER_DB_SCHEMA_APPLICATIONS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_applications_role ON applications(role_id)";

pub const LEDGER_DB_SCHEMA_COMMENTS: &str = "
    CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        author_id TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE,
        FOREIGN KEY(author_id) REFERENCES users(id)
    )
";

// comment_id is UNIQUE: the one-reply-per-comment invariant is a schema
// fact, not a presentation-layer convention.
pub const LEDGER_DB_SCHEMA_REPLIES: &str = "
    CREATE TABLE IF NOT EXISTS replies (
        id TEXT PRIMARY KEY,
        comment_id TEXT NOT NULL UNIQUE,
        author_id TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(comment_id) REFERENCES comments(id) ON DELETE CASCADE,
        FOREIGN KEY(author_id) REFERENCES users(id)
    )
";

pub const LEDGER_DB_SCHEMA: &[&str] = &[
    LEDGER_DB_SCHEMA_USERS,
    LEDGER_DB_SCHEMA_USER_SKILLS,
    LEDGER_DB_SCHEMA_PROJECTS,
    LEDGER_DB_SCHEMA_REWARDS,
    LEDGER_DB_SCHEMA_PLEDGES,
    LEDGER_DB_SCHEMA_PLEDGES_INDEX,
    LEDGER_DB_SCHEMA_ROLES,
    LEDGER_DB_SCHEMA_ROLE_SKILLS,
    LEDGER_DB_SCHEMA_APPLICATIONS,
    LEDGER_DB_SCHEMA_APPLICATIONS_INDEX,
    LEDGER_DB_SCHEMA_COMMENTS,
    LEDGER_DB_SCHEMA_REPLIES,
];

/// Apply the full ledger DDL. Idempotent; engine operations call this
/// before touching rows so a fresh store works without a separate init.
pub fn ensure_ledger_schema(conn: &Connection) -> rusqlite::Result<()> {
    for stmt in LEDGER_DB_SCHEMA {
        conn.execute(stmt, [])?;
    }
    Ok(())
}
