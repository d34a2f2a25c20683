//! Engine configuration loaded from `fundry.toml` at the store root.
//!
//! Every field has a default; a missing file means defaults across the
//! board, a malformed file is a validation error (never silently ignored).

use crate::core::error::FundryError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "fundry.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundryConfig {
    /// Upper bound on comment and reply body length, in characters.
    #[serde(default = "default_comment_max_len")]
    pub comment_max_len: usize,
    /// TTL for the read-through entity cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Inclusive bounds for declared skill levels.
    #[serde(default = "default_skill_level_min")]
    pub skill_level_min: i64,
    #[serde(default = "default_skill_level_max")]
    pub skill_level_max: i64,
}

fn default_comment_max_len() -> usize {
    2000
}
fn default_cache_ttl_secs() -> u64 {
    30
}
fn default_skill_level_min() -> i64 {
    1
}
fn default_skill_level_max() -> i64 {
    5
}

impl Default for FundryConfig {
    fn default() -> Self {
        Self {
            comment_max_len: default_comment_max_len(),
            cache_ttl_secs: default_cache_ttl_secs(),
            skill_level_min: default_skill_level_min(),
            skill_level_max: default_skill_level_max(),
        }
    }
}

/// Load `fundry.toml` from the store root, falling back to defaults when
/// the file is absent.
pub fn load(root: &Path) -> Result<FundryConfig, FundryError> {
    let path = root.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(FundryConfig::default());
    }
    let content = fs::read_to_string(&path).map_err(FundryError::Io)?;
    toml::from_str(&content)
        .map_err(|e| FundryError::invalid(format!("{} is not valid TOML: {}", CONFIG_FILE_NAME, e)))
}
