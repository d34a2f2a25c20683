//! CLI struct definitions for the Fundry command-line interface.
//!
//! All top-level clap-derived types live here; per-subsystem parser
//! structs live with their engine module. Dispatch logic lives in
//! `lib.rs::run`.

use crate::engine::{candidature, comment, lifecycle, pledge, reward, users};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "fundry",
    version = env!("CARGO_PKG_VERSION"),
    about = "Fundry is the funding and project-lifecycle engine of a crowdfunding marketplace: creators publish projects, backers pledge against tiered rewards, and software projects recruit contributors through skill-matched applications."
)]
pub(crate) struct Cli {
    /// Store root directory (defaults to FUNDRY_HOME or ./.fundry).
    #[clap(long, global = true)]
    pub dir: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Initialize the ledger database at the store root.
    Init,
    /// Print schema metadata for every subsystem.
    Schema,
    /// Manage users and their declared skills.
    User(users::UserCli),
    /// Create projects and drive their lifecycle.
    Project(lifecycle::ProjectCli),
    /// Manage reward tiers.
    Reward(reward::RewardCli),
    /// Commit and list pledges.
    Pledge(pledge::PledgeCli),
    /// Open contributor roles on software projects.
    Role(candidature::RoleCli),
    /// Apply for roles and decide applications.
    Candidature(candidature::CandidatureCli),
    /// Comment on projects; owners reply once per comment.
    Comment(comment::CommentCli),
}
