//! Timeline fetching: live first-page capture, direct API replay for later
//! pages, tagged parsing of the GraphQL response, and cursor threading.

pub mod client;
pub mod cursor;
pub mod parse;

pub use client::TimelineClient;

use crate::store::Post;

/// Opaque pagination token produced after each page fetch.
///
/// Callers thread it forward unchanged; only the cursor module ever looks
/// inside.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationCursor {
    /// Fully assembled URL of the next timeline request.
    pub url: String,
    /// Captured request headers replayed verbatim on subsequent fetches.
    pub headers: Vec<(String, String)>,
}

/// One fetched page of a timeline, newest post first.
#[derive(Debug)]
pub struct PageResult {
    pub posts: Vec<Post>,
    /// `None` signals end of feed.
    pub cursor: Option<PaginationCursor>,
}
