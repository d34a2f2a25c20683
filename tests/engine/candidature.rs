use fundry::core::auth::LedgerAuthorizer;
use fundry::core::cache::TtlCache;
use fundry::core::config::FundryConfig;
use fundry::core::db;
use fundry::core::error::FundryError;
use fundry::core::notify::MemorySink;
use fundry::core::store::Store;
use fundry::core::time;
use fundry::engine::candidature::{self, DecideOutcome, Role};
use fundry::engine::lifecycle::{self, Project, ProjectKind};
use fundry::engine::users;
use fundry::engine::EngineCtx;
use std::time::Duration;
use tempfile::tempdir;

fn test_ctx(sink: MemorySink) -> EngineCtx {
    EngineCtx {
        config: FundryConfig::default(),
        sink: Box::new(sink),
        cache: Box::new(TtlCache::new(Duration::from_secs(60))),
        authorizer: Box::new(LedgerAuthorizer),
    }
}

fn seed_store() -> (tempfile::TempDir, Store, EngineCtx, MemorySink) {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    db::initialize_ledger_db(&store.root).unwrap();
    let sink = MemorySink::new();
    let ctx = test_ctx(sink.clone());
    (tmp, store, ctx, sink)
}

fn register(store: &Store, ctx: &EngineCtx, name: &str, admin: bool) -> String {
    users::register_user(store, ctx, name, admin).unwrap().id
}

fn published_software_project(
    store: &Store,
    ctx: &EngineCtx,
    owner: &str,
    admin: &str,
) -> Project {
    let project = lifecycle::create_project(
        store,
        ctx,
        owner,
        ProjectKind::Software,
        "Firmware Toolkit",
        "An open firmware flashing toolkit.",
        500_00,
        Some(time::now_unix_secs() + 3600),
        Some("cover.png"),
    )
    .unwrap();
    lifecycle::submit_for_review(store, ctx, owner, &project.id).unwrap();
    lifecycle::approve(store, ctx, admin, &project.id).unwrap()
}

fn go_role(store: &Store, ctx: &EngineCtx, owner: &str, project: &str, headcount: i64) -> Role {
    candidature::add_role(
        store,
        ctx,
        owner,
        project,
        "Backend contributor",
        headcount,
        &[("Go".to_string(), 3)],
        &[("Docker".to_string(), 1)],
    )
    .unwrap()
}

#[test]
fn roles_exist_only_on_software_projects() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let hardware = lifecycle::create_project(
        &store,
        &ctx,
        &owner,
        ProjectKind::Hardware,
        "Telescope",
        "desc",
        10_00,
        Some(time::now_unix_secs() + 3600),
        Some("cover.png"),
    )
    .unwrap();

    let err = candidature::add_role(&store, &ctx, &owner, &hardware.id, "Dev", 1, &[], &[])
        .unwrap_err();
    assert!(matches!(err, FundryError::Validation(_)));
}

#[test]
fn role_setup_validation_aggregates() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let project = published_software_project(&store, &ctx, &owner, &admin);

    let err = candidature::add_role(
        &store,
        &ctx,
        &owner,
        &project.id,
        "",
        0,
        &[("Go".to_string(), 9)],
        &[],
    )
    .unwrap_err();
    let FundryError::Validation(problems) = err else {
        panic!("expected Validation");
    };
    assert_eq!(problems.len(), 3);

    let stranger = register(&store, &ctx, "eve", false);
    let err = candidature::add_role(&store, &ctx, &stranger, &project.id, "Dev", 1, &[], &[])
        .unwrap_err();
    assert!(matches!(err, FundryError::Authorization(_)));
}

#[test]
fn skill_mismatch_names_every_unmet_requirement() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let applicant = register(&store, &ctx, "bob", false);
    let project = published_software_project(&store, &ctx, &owner, &admin);

    let role = candidature::add_role(
        &store,
        &ctx,
        &owner,
        &project.id,
        "Backend contributor",
        1,
        &[("Go".to_string(), 3), ("SQL".to_string(), 2)],
        &[("Docker".to_string(), 1)],
    )
    .unwrap();

    // Go held below level, SQL not held, Docker (optional) irrelevant.
    users::set_skill(&store, &ctx, &applicant, "Go", 2).unwrap();

    let err = candidature::apply(&store, &ctx, &role.id, &applicant, "hi").unwrap_err();
    let FundryError::SkillMismatch(unmet) = err else {
        panic!("expected SkillMismatch");
    };
    assert_eq!(unmet.len(), 2);
    assert!(unmet.iter().any(|m| m.starts_with("Go:")));
    assert!(unmet.iter().any(|m| m.starts_with("SQL:")));
    assert!(!unmet.iter().any(|m| m.starts_with("Docker")));
}

#[test]
fn optional_skills_never_block() {
    let (_tmp, store, ctx, sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let applicant = register(&store, &ctx, "bob", false);
    let project = published_software_project(&store, &ctx, &owner, &admin);
    let role = go_role(&store, &ctx, &owner, &project.id, 1);

    users::set_skill(&store, &ctx, &applicant, "Go", 3).unwrap();
    // No Docker skill declared; it is informational only.
    let application =
        candidature::apply(&store, &ctx, &role.id, &applicant, "let me in").unwrap();
    assert_eq!(application.status, "pending");
    assert!(sink.kinds().contains(&"application_submitted".to_string()));
}

#[test]
fn duplicate_application_is_rejected() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let applicant = register(&store, &ctx, "bob", false);
    let project = published_software_project(&store, &ctx, &owner, &admin);
    let role = go_role(&store, &ctx, &owner, &project.id, 2);

    users::set_skill(&store, &ctx, &applicant, "Go", 4).unwrap();
    candidature::apply(&store, &ctx, &role.id, &applicant, "first").unwrap();
    let err = candidature::apply(&store, &ctx, &role.id, &applicant, "second").unwrap_err();
    assert!(matches!(err, FundryError::DuplicateApplication));
    assert_eq!(candidature::list_applications(&store, &role.id).unwrap().len(), 1);
}

#[test]
fn apply_requires_published_project() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let applicant = register(&store, &ctx, "bob", false);
    let project = published_software_project(&store, &ctx, &owner, &admin);
    let role = go_role(&store, &ctx, &owner, &project.id, 1);
    users::set_skill(&store, &ctx, &applicant, "Go", 4).unwrap();

    let err = candidature::apply(&store, &ctx, "ROL_MISSING", &applicant, "hi").unwrap_err();
    assert!(matches!(err, FundryError::NotFound(_)));

    // Closing the project freezes applications.
    lifecycle::close(&store, &ctx, &owner, &project.id).unwrap();
    let err = candidature::apply(&store, &ctx, &role.id, &applicant, "hi").unwrap_err();
    assert!(matches!(err, FundryError::NotFound(_)));
}

#[test]
fn decide_is_owner_only_and_terminal() {
    let (_tmp, store, ctx, sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let applicant = register(&store, &ctx, "bob", false);
    let stranger = register(&store, &ctx, "eve", false);
    let project = published_software_project(&store, &ctx, &owner, &admin);
    let role = go_role(&store, &ctx, &owner, &project.id, 1);
    users::set_skill(&store, &ctx, &applicant, "Go", 4).unwrap();
    let application = candidature::apply(&store, &ctx, &role.id, &applicant, "hi").unwrap();

    // Neither a stranger nor even an administrator may decide.
    let err = candidature::decide(&store, &ctx, &application.id, &stranger, DecideOutcome::Accept)
        .unwrap_err();
    assert!(matches!(err, FundryError::Authorization(_)));
    let err = candidature::decide(&store, &ctx, &application.id, &admin, DecideOutcome::Accept)
        .unwrap_err();
    assert!(matches!(err, FundryError::Authorization(_)));

    let accepted =
        candidature::decide(&store, &ctx, &application.id, &owner, DecideOutcome::Accept).unwrap();
    assert_eq!(accepted.status, "accepted");
    assert_eq!(accepted.reviewer_id.as_deref(), Some(owner.as_str()));
    assert!(accepted.decided_at.is_some());
    assert!(sink.kinds().contains(&"application_accepted".to_string()));

    let role_after = candidature::get_role(&store, &role.id).unwrap().unwrap();
    assert_eq!(role_after.filled_count, 1);

    // Re-deciding a decided application fails.
    let err = candidature::decide(&store, &ctx, &application.id, &owner, DecideOutcome::Reject)
        .unwrap_err();
    assert!(matches!(err, FundryError::AlreadyDecided));
}

#[test]
fn accept_recheck_catches_concurrent_fill() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let first = register(&store, &ctx, "bob", false);
    let second = register(&store, &ctx, "carol", false);
    let project = published_software_project(&store, &ctx, &owner, &admin);
    let role = go_role(&store, &ctx, &owner, &project.id, 1);
    users::set_skill(&store, &ctx, &first, "Go", 4).unwrap();
    users::set_skill(&store, &ctx, &second, "Go", 5).unwrap();

    // Both applications were viable at submit time (headcount 1, fill 0).
    let app_a = candidature::apply(&store, &ctx, &role.id, &first, "hi").unwrap();
    let app_b = candidature::apply(&store, &ctx, &role.id, &second, "hi").unwrap();

    candidature::decide(&store, &ctx, &app_a.id, &owner, DecideOutcome::Accept).unwrap();
    let err = candidature::decide(&store, &ctx, &app_b.id, &owner, DecideOutcome::Accept)
        .unwrap_err();
    assert!(matches!(err, FundryError::RoleFull(_)));

    // The losing application is still pending and can be rejected.
    let rejected =
        candidature::decide(&store, &ctx, &app_b.id, &owner, DecideOutcome::Reject).unwrap();
    assert_eq!(rejected.status, "rejected");
    let role_after = candidature::get_role(&store, &role.id).unwrap().unwrap();
    assert_eq!(role_after.filled_count, 1);
}

#[test]
fn full_role_refuses_new_applications() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let first = register(&store, &ctx, "bob", false);
    let late = register(&store, &ctx, "dan", false);
    let project = published_software_project(&store, &ctx, &owner, &admin);
    let role = go_role(&store, &ctx, &owner, &project.id, 1);
    users::set_skill(&store, &ctx, &first, "Go", 4).unwrap();
    users::set_skill(&store, &ctx, &late, "Go", 4).unwrap();

    let app = candidature::apply(&store, &ctx, &role.id, &first, "hi").unwrap();
    candidature::decide(&store, &ctx, &app.id, &owner, DecideOutcome::Accept).unwrap();

    let err = candidature::apply(&store, &ctx, &role.id, &late, "hi").unwrap_err();
    assert!(matches!(err, FundryError::RoleFull(_)));
}

#[test]
fn decide_frozen_once_project_closed() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let applicant = register(&store, &ctx, "bob", false);
    let project = published_software_project(&store, &ctx, &owner, &admin);
    let role = go_role(&store, &ctx, &owner, &project.id, 1);
    users::set_skill(&store, &ctx, &applicant, "Go", 4).unwrap();
    let application = candidature::apply(&store, &ctx, &role.id, &applicant, "hi").unwrap();

    lifecycle::close(&store, &ctx, &owner, &project.id).unwrap();
    let err = candidature::decide(&store, &ctx, &application.id, &owner, DecideOutcome::Accept)
        .unwrap_err();
    assert!(matches!(err, FundryError::ProjectNotOpen(_)));
}

#[test]
fn skill_levels_are_bounded() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let user = register(&store, &ctx, "bob", false);

    let err = users::set_skill(&store, &ctx, &user, "Go", 0).unwrap_err();
    assert!(matches!(err, FundryError::Validation(_)));
    let err = users::set_skill(&store, &ctx, &user, "Go", 6).unwrap_err();
    assert!(matches!(err, FundryError::Validation(_)));

    users::set_skill(&store, &ctx, &user, "Go", 3).unwrap();
    users::set_skill(&store, &ctx, &user, "Go", 5).unwrap();
    let loaded = users::get_user(&store, &user).unwrap().unwrap();
    assert_eq!(loaded.skills.len(), 1);
    assert_eq!(loaded.skills[0].level, 5);

    users::drop_skill(&store, &user, "Go").unwrap();
    let loaded = users::get_user(&store, &user).unwrap().unwrap();
    assert!(loaded.skills.is_empty());
}
