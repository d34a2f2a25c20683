//! Core modules for Fundry's ledger plumbing.
//!
//! Shared primitives live here: the SQLite broker, schema DDL, the
//! capability traits (authorization, notification, cache), configuration
//! and timestamp/id helpers. Engine semantics live in `crate::engine`.

pub mod auth;
pub mod broker;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod schemas;
pub mod store;
pub mod time;
