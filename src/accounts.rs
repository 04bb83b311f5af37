//! The caller-owned account list.
//!
//! `accounts.json` is an ordered list of account records. The crawler only
//! reads `x.screen_name` and writes back a few enrichment fields; every
//! other field is opaque pass-through and survives a round trip verbatim.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::store::Post;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub x: XProfile,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XProfile {
    pub screen_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url_https: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Account {
    /// Refresh cached profile metadata from a post's embedded author
    /// payload. Best-effort: absent fields leave the cache untouched.
    pub fn refresh_profile(&mut self, post: &Post) {
        let Some(user) = post.raw_data.pointer("/core/user_results/result") else {
            debug!(id = %post.id, "Post carries no author payload");
            return;
        };
        if let Some(name) = user.pointer("/core/name").and_then(Value::as_str) {
            self.x.name = Some(name.to_string());
        }
        if let Some(description) = user.pointer("/legacy/description").and_then(Value::as_str) {
            self.x.description = Some(description.to_string());
        }
        if let Some(avatar) = user.pointer("/avatar/image_url").and_then(Value::as_str) {
            self.x.profile_image_url_https = Some(avatar.to_string());
        }
    }
}

/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub async fn load_accounts(path: &Path) -> Result<Vec<Account>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read account list {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse account list {}", path.display()))
}

/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn save_accounts(path: &Path, accounts: &[Account]) -> Result<()> {
    let json =
        serde_json::to_string_pretty(accounts).context("Failed to serialize account list")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write account list {}", path.display()))
}
