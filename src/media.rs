//! Attachment downloads.
//!
//! Sequential, blocking fetches of attachment bytes into the account's post
//! directory. The deterministic filename is the dedup key: a file already
//! present is never re-fetched. Bodies land in a `.part` file first and are
//! renamed into place, so a crash mid-write cannot leave a corrupt file
//! under the dedup name.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::store::{Attachment, Post};

pub struct MediaFetcher {
    client: reqwest::Client,
    data_dir: PathBuf,
}

impl MediaFetcher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(data_dir: PathBuf, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, data_dir })
    }

    /// Download every attachment of every post, in the given order.
    ///
    /// # Errors
    ///
    /// A failed download is fatal for the run; attachments fetched before
    /// the failure stay on disk and are skipped next time.
    pub async fn download_all(&self, posts: &[Post]) -> Result<()> {
        for post in posts {
            for attachment in &post.attachments {
                self.download_one(post, attachment).await.with_context(|| {
                    format!("Failed to download attachment for post {}", post.id)
                })?;
            }
        }
        Ok(())
    }

    async fn download_one(&self, post: &Post, attachment: &Attachment) -> Result<()> {
        let dir = self
            .data_dir
            .join("posts")
            .join("x")
            .join(&post.username);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create media directory {}", dir.display()))?;

        let path = dir.join(attachment.local_filename());
        if path.exists() {
            debug!(path = %path.display(), "Attachment already downloaded");
            return Ok(());
        }

        info!(url = %attachment.url, "Downloading attachment");
        let response = self
            .client
            .get(&attachment.url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", attachment.url))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Attachment fetch failed with status {status}: {}", attachment.url);
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", attachment.url))?;

        let partial = dir.join(format!("{}.part", attachment.local_filename()));
        tokio::fs::write(&partial, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        tokio::fs::rename(&partial, &path)
            .await
            .with_context(|| format!("Failed to move attachment into {}", path.display()))?;

        debug!(path = %path.display(), size = bytes.len(), "Attachment saved");
        Ok(())
    }
}
