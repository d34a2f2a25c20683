//! Engine semantics: the funding and project-lifecycle operations.
//!
//! Each module owns one slice of the domain and exposes free functions
//! over a [`Store`] handle plus an [`EngineCtx`] carrying the capability
//! implementations (authorization, notification, cache) and config.

use crate::core::auth::{Authorizer, LedgerAuthorizer};
use crate::core::cache::{EntityCache, TtlCache};
use crate::core::config::{self, FundryConfig};
use crate::core::error::FundryError;
use crate::core::notify::{JsonlSink, NotificationSink};
use crate::core::store::Store;
use std::time::Duration;

pub mod candidature;
pub mod comment;
pub mod lifecycle;
pub mod pledge;
pub mod reward;
pub mod users;

/// Capability bundle handed to every engine operation.
///
/// Production callers use [`EngineCtx::standard`]; tests swap in memory
/// sinks or a null cache without touching the operations.
pub struct EngineCtx {
    pub config: FundryConfig,
    pub sink: Box<dyn NotificationSink>,
    pub cache: Box<dyn EntityCache>,
    pub authorizer: Box<dyn Authorizer>,
}

impl EngineCtx {
    /// Default wiring: `fundry.toml` config, JSONL notification feed at
    /// the store root, TTL entity cache, ledger-backed authorizer.
    pub fn standard(store: &Store) -> Result<Self, FundryError> {
        let cfg = config::load(&store.root)?;
        let ttl = Duration::from_secs(cfg.cache_ttl_secs);
        Ok(Self {
            sink: Box::new(JsonlSink::new(&store.root)),
            cache: Box::new(TtlCache::new(ttl)),
            authorizer: Box::new(LedgerAuthorizer),
            config: cfg,
        })
    }
}
