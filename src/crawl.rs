//! The pagination/dedup walker.
//!
//! Drives a [`TimelineSource`] page by page, classifying every post as new
//! or already archived, and decides when to stop. Unbounded crawls assume
//! the feed is reverse-chronological and the store was caught up as of the
//! last run, so the first page containing a known post ends the walk.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::accounts::Account;
use crate::media::MediaFetcher;
use crate::store::{Post, PostRepository};
use crate::timeline::{PageResult, PaginationCursor};

/// One page of an account timeline, fetched either live or by API replay.
#[async_trait]
pub trait TimelineSource {
    /// Fetch the page at `cursor`, or the start of the feed when `None`.
    async fn fetch_page(
        &mut self,
        username: &str,
        cursor: Option<PaginationCursor>,
    ) -> Result<PageResult>;
}

/// Posts discovered by one crawl, newest first in both lists.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub new_posts: Vec<Post>,
    pub old_posts: Vec<Post>,
}

/// Walk the timeline until the stop condition is reached.
///
/// Stops on an empty page, after `max_pages` pages when given, at the first
/// page containing an already-archived post when unbounded, or when the
/// feed reports no further cursor.
///
/// # Errors
///
/// Propagates fetch and repository errors; nothing is persisted here.
pub async fn crawl_timeline<S: TimelineSource + Send>(
    source: &mut S,
    repo: &PostRepository,
    username: &str,
    max_pages: Option<u32>,
) -> Result<CrawlOutcome> {
    let mut cursor: Option<PaginationCursor> = None;
    let mut outcome = CrawlOutcome::default();
    let mut page_count: u32 = 0;

    loop {
        let page = source.fetch_page(username, cursor.take()).await?;
        if page.posts.is_empty() {
            info!(username, pages = page_count, "End of feed");
            break;
        }
        page_count += 1;

        let mut found_saved = false;
        for post in page.posts {
            if repo.get(username, &post.id).await?.is_some() {
                debug!(id = %post.id, "Post already archived");
                found_saved = true;
                outcome.old_posts.push(post);
            } else {
                outcome.new_posts.push(post);
            }
        }

        if let Some(max) = max_pages {
            if page_count >= max {
                info!(username, pages = page_count, "Reached page limit");
                break;
            }
        } else if found_saved {
            info!(username, pages = page_count, "Caught up with the archive");
            break;
        }

        match page.cursor {
            Some(next) => cursor = Some(next),
            None => {
                info!(username, pages = page_count, "Feed reported no further pages");
                break;
            }
        }
    }

    Ok(outcome)
}

/// Crawl one account end to end: classify, download media, persist, and
/// refresh cached profile metadata.
///
/// New posts are persisted oldest first so a crash can never leave a newer
/// post saved while an older unseen one from the same run is lost.
///
/// # Errors
///
/// Propagates crawl, download, and persistence errors.
pub async fn handle_account<S: TimelineSource + Send>(
    source: &mut S,
    repo: &PostRepository,
    media: &MediaFetcher,
    account: &mut Account,
    max_pages: Option<u32>,
) -> Result<()> {
    let username = account.x.screen_name.clone();
    let CrawlOutcome {
        mut new_posts,
        old_posts,
    } = crawl_timeline(source, repo, &username, max_pages).await?;

    new_posts.reverse();

    if account.x.download_images.unwrap_or(true) {
        media.download_all(&new_posts).await?;
    }

    for post in &new_posts {
        repo.put(post)
            .await
            .with_context(|| format!("Failed to persist post {}", post.id))?;
    }

    // Best-effort enrichment from the freshest known post.
    if let Some(first_old) = old_posts.first() {
        account.refresh_profile(first_old);
    }

    info!(
        username,
        new = new_posts.len(),
        known = old_posts.len(),
        "Account crawl complete"
    );
    Ok(())
}
