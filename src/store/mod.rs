//! Flat-file post storage.
//!
//! Posts are stored one JSON file per post under
//! `{data_dir}/posts/x/{username}/{post_id}.json`. There is no database;
//! existence of the file is the dedup check. Single writer assumed.

mod models;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub use models::{Attachment, MediaKind, Post};

/// Read/write access to archived posts, keyed by `(username, id)`.
#[derive(Debug, Clone)]
pub struct PostRepository {
    data_dir: PathBuf,
}

impl PostRepository {
    #[must_use]
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Directory holding all files for one account.
    #[must_use]
    pub fn user_dir(&self, username: &str) -> PathBuf {
        self.data_dir.join("posts").join("x").join(username)
    }

    #[must_use]
    pub fn post_path(&self, username: &str, post_id: &str) -> PathBuf {
        self.user_dir(username).join(format!("{post_id}.json"))
    }

    /// Fetch a stored post, or `None` if it has never been archived.
    ///
    /// Doubles as the existence check used for crawl deduplication.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn get(&self, username: &str, post_id: &str) -> Result<Option<Post>> {
        let path = self.post_path(username, post_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read post {}", path.display()))
            }
        };
        let post = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse stored post {}", path.display()))?;
        Ok(Some(post))
    }

    /// Persist a post as pretty-printed JSON, creating the account directory
    /// if needed. Never called twice for the same `(username, id)` by the
    /// crawler; a second call would overwrite byte-identical content.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn put(&self, post: &Post) -> Result<()> {
        let dir = self.user_dir(&post.username);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create post directory {}", dir.display()))?;

        let path = self.post_path(&post.username, &post.id);
        let json = serde_json::to_string_pretty(post).context("Failed to serialize post")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write post {}", path.display()))?;
        Ok(())
    }
}
