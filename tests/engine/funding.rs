use fundry::core::auth::LedgerAuthorizer;
use fundry::core::cache::{self, EntityCache, TtlCache};
use fundry::core::config::FundryConfig;
use fundry::core::db;
use fundry::core::error::FundryError;
use fundry::core::notify::{MemorySink, Notification, NotificationSink};
use fundry::core::store::Store;
use fundry::core::time;
use fundry::engine::lifecycle::{self, Project, ProjectKind};
use fundry::engine::pledge::{self, PledgeReceipt};
use fundry::engine::reward::{self, Reward};
use fundry::engine::users;
use fundry::engine::EngineCtx;
use std::sync::{Arc, Barrier};
use std::thread;
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

/// Draft -> in_review -> published, deadline one hour out.
fn published_project(store: &Store, ctx: &EngineCtx, owner: &str, admin: &str) -> Project {
    published_project_with_deadline(store, ctx, owner, admin, time::now_unix_secs() + 3600)
}

fn published_project_with_deadline(
    store: &Store,
    ctx: &EngineCtx,
    owner: &str,
    admin: &str,
    deadline: i64,
) -> Project {
    let project = lifecycle::create_project(
        store,
        ctx,
        owner,
        ProjectKind::Hardware,
        "Open Telescope",
        "A 10-inch community telescope kit.",
        1000_00,
        Some(deadline),
        Some("cover.png"),
    )
    .unwrap();
    lifecycle::submit_for_review(store, ctx, owner, &project.id).unwrap();
    lifecycle::approve(store, ctx, admin, &project.id).unwrap()
}

fn tier(
    store: &Store,
    ctx: &EngineCtx,
    owner: &str,
    admin: &str,
    minimum: i64,
    capacity: Option<i64>,
) -> (Project, Reward) {
    let project = lifecycle::create_project(
        store,
        ctx,
        owner,
        ProjectKind::Hardware,
        "Open Telescope",
        "A 10-inch community telescope kit.",
        1000_00,
        Some(time::now_unix_secs() + 3600),
        Some("cover.png"),
    )
    .unwrap();
    let reward = reward::add_reward(
        store,
        ctx,
        owner,
        &project.id,
        "Early bird",
        minimum,
        capacity,
    )
    .unwrap();
    lifecycle::submit_for_review(store, ctx, owner, &project.id).unwrap();
    let project = lifecycle::approve(store, ctx, admin, &project.id).unwrap();
    (project, reward)
}

#[test]
fn reward_setup_rules() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let stranger = register(&store, &ctx, "eve", false);
    let admin = register(&store, &ctx, "root", true);
    let project = published_project(&store, &ctx, &owner, &admin);

    // Tiers are set up before publication.
    let err =
        reward::add_reward(&store, &ctx, &owner, &project.id, "Late tier", 10_00, None).unwrap_err();
    assert!(matches!(err, FundryError::Validation(_)));

    let draft = lifecycle::create_project(
        &store,
        &ctx,
        &owner,
        ProjectKind::Hardware,
        "Second",
        "desc",
        10_00,
        Some(time::now_unix_secs() + 3600),
        Some("cover.png"),
    )
    .unwrap();

    let err =
        reward::add_reward(&store, &ctx, &stranger, &draft.id, "Sticker", 5_00, None).unwrap_err();
    assert!(matches!(err, FundryError::Authorization(_)));

    let err = reward::add_reward(&store, &ctx, &owner, &draft.id, "", 0, Some(0)).unwrap_err();
    let FundryError::Validation(problems) = err else {
        panic!("expected Validation");
    };
    assert_eq!(problems.len(), 3);

    let tier = reward::add_reward(&store, &ctx, &owner, &draft.id, "Sticker", 5_00, Some(10))
        .unwrap();
    assert_eq!(tier.claimed_count, 0);
    assert_eq!(tier.capacity, Some(10));

    // Unclaimed tiers can be removed; the stranger still cannot.
    let err = reward::delete_reward(&store, &ctx, &stranger, &tier.id).unwrap_err();
    assert!(matches!(err, FundryError::Authorization(_)));
    reward::delete_reward(&store, &ctx, &owner, &tier.id).unwrap();
    assert!(reward::get_reward(&store, &ctx, &tier.id).unwrap().is_none());
}

#[test]
fn claimed_reward_cannot_be_deleted() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let backer = register(&store, &ctx, "bob", false);
    let (project, tier) = tier(&store, &ctx, &owner, &admin, 50_00, Some(5));

    pledge::pledge(&store, &ctx, &project.id, &backer, 60_00, Some(&tier.id)).unwrap();

    let err = reward::delete_reward(&store, &ctx, &owner, &tier.id).unwrap_err();
    assert!(matches!(err, FundryError::Validation(_)));
}

#[test]
fn pledge_scenario_last_slot() {
    // Goal 1000_00, reward A: minimum 50_00, capacity 1.
    let (_tmp, store, ctx, sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let backer_x = register(&store, &ctx, "x", false);
    let backer_y = register(&store, &ctx, "y", false);
    let (project, tier) = tier(&store, &ctx, &owner, &admin, 50_00, Some(1));

    let receipt =
        pledge::pledge(&store, &ctx, &project.id, &backer_x, 60_00, Some(&tier.id)).unwrap();
    assert_eq!(receipt.raised_amount, 60_00);
    let tier_after = reward::get_reward(&store, &ctx, &tier.id).unwrap().unwrap();
    assert_eq!(tier_after.claimed_count, 1);

    let err = pledge::pledge(&store, &ctx, &project.id, &backer_y, 70_00, Some(&tier.id))
        .unwrap_err();
    assert!(matches!(err, FundryError::RewardExhausted(_)));

    // The failed pledge left no trace: raised amount and ledger rows unchanged.
    let project_after = lifecycle::get_project(&store, &ctx, &project.id).unwrap().unwrap();
    assert_eq!(project_after.raised_amount, 60_00);
    assert_eq!(pledge::list_pledges(&store, &project.id).unwrap().len(), 1);

    let committed: Vec<Notification> = sink
        .events()
        .into_iter()
        .filter(|e| e.kind == "pledge_committed")
        .collect();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].subject_id, project.id);
    assert_eq!(committed[0].payload["amount"], 60_00);
    assert_eq!(committed[0].payload["backer_id"], backer_x);
}

#[test]
fn pledge_below_minimum_is_rejected() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let backer = register(&store, &ctx, "bob", false);
    let (project, tier) = tier(&store, &ctx, &owner, &admin, 50_00, None);

    let err =
        pledge::pledge(&store, &ctx, &project.id, &backer, 49_99, Some(&tier.id)).unwrap_err();
    let FundryError::AmountTooLow { offered, minimum } = err else {
        panic!("expected AmountTooLow");
    };
    assert_eq!(offered, 49_99);
    assert_eq!(minimum, 50_00);
}

#[test]
fn pledge_gate_checks() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let backer = register(&store, &ctx, "bob", false);

    let err = pledge::pledge(&store, &ctx, "PRJ_MISSING", &backer, 10_00, None).unwrap_err();
    assert!(matches!(err, FundryError::NotFound(_)));

    // Draft projects are not open for funding.
    let draft = lifecycle::create_project(
        &store,
        &ctx,
        &owner,
        ProjectKind::Hardware,
        "Draft",
        "desc",
        10_00,
        Some(time::now_unix_secs() + 3600),
        Some("cover.png"),
    )
    .unwrap();
    let err = pledge::pledge(&store, &ctx, &draft.id, &backer, 10_00, None).unwrap_err();
    assert!(matches!(err, FundryError::ProjectNotOpen(_)));

    let published = published_project(&store, &ctx, &owner, &admin);
    let err = pledge::pledge(&store, &ctx, &published.id, &backer, 0, None).unwrap_err();
    assert!(matches!(err, FundryError::Validation(_)));
    let err = pledge::pledge(&store, &ctx, &published.id, "USR_GHOST", 10_00, None).unwrap_err();
    assert!(matches!(err, FundryError::NotFound(_)));

    // A reward belonging to another project is treated as absent.
    let (_, other_tier) = tier(&store, &ctx, &owner, &admin, 5_00, None);
    let err = pledge::pledge(
        &store,
        &ctx,
        &published.id,
        &backer,
        10_00,
        Some(&other_tier.id),
    )
    .unwrap_err();
    assert!(matches!(err, FundryError::NotFound(_)));

    // Closed projects freeze pledges.
    lifecycle::close(&store, &ctx, &owner, &published.id).unwrap();
    let err = pledge::pledge(&store, &ctx, &published.id, &backer, 10_00, None).unwrap_err();
    assert!(matches!(err, FundryError::ProjectNotOpen(_)));
}

#[test]
fn pledge_after_deadline_is_rejected() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let backer = register(&store, &ctx, "bob", false);
    let project = published_project_with_deadline(
        &store,
        &ctx,
        &owner,
        &admin,
        time::now_unix_secs() + 1,
    );

    thread::sleep(Duration::from_secs(2));
    let err = pledge::pledge(&store, &ctx, &project.id, &backer, 10_00, None).unwrap_err();
    assert!(matches!(err, FundryError::ProjectNotOpen(_)));
}

#[test]
fn concurrent_pledges_for_last_slot_take_at_most_one() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let backers: Vec<String> = (0..8)
        .map(|i| register(&store, &ctx, &format!("backer{}", i), false))
        .collect();
    let (project, tier) = tier(&store, &ctx, &owner, &admin, 50_00, Some(1));

    let barrier = Arc::new(Barrier::new(backers.len()));
    let mut handles = Vec::new();
    for backer in backers {
        let root = store.root.clone();
        let project_id = project.id.clone();
        let reward_id = tier.id.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let store = Store::new(root);
            let ctx = test_ctx(MemorySink::new());
            barrier.wait();
            pledge::pledge(&store, &ctx, &project_id, &backer, 60_00, Some(&reward_id))
        }));
    }

    let results: Vec<Result<PledgeReceipt, FundryError>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one pledge may take the last slot");
    for failed in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            failed.as_ref().unwrap_err(),
            FundryError::RewardExhausted(_)
        ));
    }

    let tier_after = reward::get_reward(&store, &ctx, &tier.id).unwrap().unwrap();
    assert_eq!(tier_after.claimed_count, 1);

    // Losers rolled back whole: only the winner's amount was raised.
    let project_after = lifecycle::get_project(&store, &ctx, &project.id).unwrap().unwrap();
    assert_eq!(project_after.raised_amount, 60_00);
    assert_eq!(pledge::list_pledges(&store, &project.id).unwrap().len(), 1);
}

#[test]
fn raised_amount_equals_pledge_sum_after_concurrent_commits() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let backers: Vec<String> = (0..6)
        .map(|i| register(&store, &ctx, &format!("backer{}", i), false))
        .collect();
    let project = published_project(&store, &ctx, &owner, &admin);

    let barrier = Arc::new(Barrier::new(backers.len()));
    let mut handles = Vec::new();
    for (i, backer) in backers.iter().enumerate() {
        let root = store.root.clone();
        let project_id = project.id.clone();
        let backer = backer.clone();
        let amount = (i as i64 + 1) * 10_00;
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let store = Store::new(root);
            let ctx = test_ctx(MemorySink::new());
            barrier.wait();
            pledge::pledge(&store, &ctx, &project_id, &backer, amount, None)
        }));
    }
    for h in handles {
        h.join().unwrap().unwrap();
    }

    let pledges = pledge::list_pledges(&store, &project.id).unwrap();
    assert_eq!(pledges.len(), 6);
    let total: i64 = pledges.iter().map(|p| p.amount).sum();
    let project_after = lifecycle::get_project(&store, &ctx, &project.id).unwrap().unwrap();
    assert_eq!(project_after.raised_amount, total);
    assert_eq!(total, 210_00);
}

#[test]
fn stale_cached_reward_never_drives_the_capacity_decision() {
    let (_tmp, store, ctx, _sink) = seed_store();
    let owner = register(&store, &ctx, "ada", false);
    let admin = register(&store, &ctx, "root", true);
    let backer_x = register(&store, &ctx, "x", false);
    let backer_y = register(&store, &ctx, "y", false);
    let (project, tier) = tier(&store, &ctx, &owner, &admin, 50_00, Some(1));

    pledge::pledge(&store, &ctx, &project.id, &backer_x, 60_00, Some(&tier.id)).unwrap();

    // Poison the cache with a pre-pledge view of the tier. The capacity
    // check reads the ledger row inside the transaction, so the stale
    // entry must not matter.
    let mut stale = tier.clone();
    stale.claimed_count = 0;
    ctx.cache.put(
        &cache::reward_key(&tier.id),
        serde_json::to_string(&stale).unwrap(),
    );

    let err = pledge::pledge(&store, &ctx, &project.id, &backer_y, 60_00, Some(&tier.id))
        .unwrap_err();
    assert!(matches!(err, FundryError::RewardExhausted(_)));
}

struct FailingSink;
impl NotificationSink for FailingSink {
    fn emit(&self, _event: &Notification) -> Result<(), FundryError> {
        Err(FundryError::invalid("sink down"))
    }
}

#[test]
fn sink_failure_never_rolls_back_a_pledge() {
    let (_tmp, store, setup_ctx, _sink) = seed_store();
    let owner = register(&store, &setup_ctx, "ada", false);
    let admin = register(&store, &setup_ctx, "root", true);
    let backer = register(&store, &setup_ctx, "bob", false);
    let project = published_project(&store, &setup_ctx, &owner, &admin);

    let ctx = EngineCtx {
        config: FundryConfig::default(),
        sink: Box::new(FailingSink),
        cache: Box::new(TtlCache::new(Duration::from_secs(60))),
        authorizer: Box::new(LedgerAuthorizer),
    };
    let receipt = pledge::pledge(&store, &ctx, &project.id, &backer, 25_00, None).unwrap();
    assert_eq!(receipt.raised_amount, 25_00);
    assert_eq!(pledge::list_pledges(&store, &project.id).unwrap().len(), 1);
}
