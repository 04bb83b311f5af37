//! Tagged parsing of the timeline GraphQL response.
//!
//! The upstream body is a deeply nested envelope of instructions, entries
//! and items discriminated by `type`/`__typename` tags. Each level is an
//! explicit sum type with an unrecognized-variant fallback that skips and
//! logs instead of failing the whole page.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::store::{Attachment, MediaKind, Post};

/// The platform's native `created_at` format, e.g.
/// `Wed Oct 10 20:19:24 +0000 2018`.
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    data: TimelineData,
}

#[derive(Debug, Deserialize)]
struct TimelineData {
    user: UserEnvelope,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    result: UserEnvelopeResult,
}

#[derive(Debug, Deserialize)]
struct UserEnvelopeResult {
    timeline: TimelineWrapper,
}

#[derive(Debug, Deserialize)]
struct TimelineWrapper {
    timeline: Timeline,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    #[serde(default)]
    instructions: Vec<Instruction>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Instruction {
    TimelineAddEntries {
        #[serde(default)]
        entries: Vec<Entry>,
    },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(rename = "entryId", default)]
    entry_id: String,
    content: EntryContent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum EntryContent {
    TimelineTimelineCursor {
        #[serde(rename = "cursorType")]
        cursor_type: String,
        value: String,
    },
    TimelineTimelineItem {
        #[serde(rename = "itemContent")]
        item_content: ItemContent,
    },
    TimelineTimelineModule {
        #[serde(default)]
        items: Vec<ModuleEntry>,
    },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    item: ModuleItem,
}

#[derive(Debug, Deserialize)]
struct ModuleItem {
    #[serde(rename = "itemContent")]
    item_content: ItemContent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum ItemContent {
    TimelineTweet {
        tweet_results: TweetResults,
    },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct TweetResults {
    // Absent for tombstoned or withheld posts.
    #[serde(default)]
    result: Option<TweetResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum TweetResult {
    Tweet(Value),
    TweetWithVisibilityResults { tweet: Value },
    #[serde(other)]
    Unrecognized,
}

/// Fields extracted from a raw post record.
#[derive(Debug, Deserialize)]
struct PostFields {
    rest_id: String,
    core: PostCore,
    legacy: PostLegacy,
}

#[derive(Debug, Deserialize)]
struct PostCore {
    user_results: UserResults,
}

#[derive(Debug, Deserialize)]
struct UserResults {
    result: UserResult,
}

#[derive(Debug, Deserialize)]
struct UserResult {
    core: UserCore,
}

#[derive(Debug, Deserialize)]
struct UserCore {
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct PostLegacy {
    created_at: String,
    #[serde(default)]
    extended_entities: ExtendedEntities,
}

#[derive(Debug, Default, Deserialize)]
struct ExtendedEntities {
    #[serde(default)]
    media: Vec<RawMedia>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    #[serde(rename = "type")]
    kind: MediaKind,
    media_url_https: String,
}

/// The useful content of one timeline page.
#[derive(Debug)]
pub struct ParsedPage {
    /// Posts by the requested author, in page (reverse-chronological) order.
    pub posts: Vec<Post>,
    /// Bottom cursor value, if the page carried one.
    pub next_cursor: Option<String>,
}

/// Parse a timeline response body, keeping only posts authored by
/// `username`.
///
/// # Errors
///
/// Returns an error if the body does not have the timeline envelope shape
/// or a recognized post record is missing required fields.
pub fn parse_timeline_page(body: &Value, username: &str) -> Result<ParsedPage> {
    let response = TimelineResponse::deserialize(body)
        .context("Response body does not look like a timeline")?;

    let mut next_cursor = None;
    let mut posts = Vec::new();

    for instruction in response.data.user.result.timeline.timeline.instructions {
        let entries = match instruction {
            Instruction::TimelineAddEntries { entries } => entries,
            Instruction::Unrecognized => continue,
        };

        for entry in entries {
            let mut raw_posts: Vec<Value> = Vec::new();

            match entry.content {
                EntryContent::TimelineTimelineCursor { cursor_type, value } => {
                    if cursor_type == "Bottom" {
                        next_cursor = Some(value);
                    }
                }
                EntryContent::TimelineTimelineItem { item_content } => {
                    collect_raw_post(item_content, &entry.entry_id, &mut raw_posts);
                }
                EntryContent::TimelineTimelineModule { items } => {
                    for item in items {
                        collect_raw_post(item.item.item_content, &entry.entry_id, &mut raw_posts);
                    }
                }
                EntryContent::Unrecognized => {
                    debug!(entry_id = %entry.entry_id, "Skipping unrecognized entry content");
                }
            }

            for raw in raw_posts {
                if let Some(post) = extract_post(raw, username)? {
                    posts.push(post);
                }
            }
        }
    }

    Ok(ParsedPage { posts, next_cursor })
}

fn collect_raw_post(item_content: ItemContent, entry_id: &str, out: &mut Vec<Value>) {
    let results = match item_content {
        ItemContent::TimelineTweet { tweet_results } => tweet_results,
        ItemContent::Unrecognized => {
            debug!(entry_id = %entry_id, "Skipping unrecognized item content");
            return;
        }
    };
    match results.result {
        // A wrapped record unwraps to the inner post.
        Some(TweetResult::TweetWithVisibilityResults { tweet }) => out.push(tweet),
        Some(TweetResult::Tweet(raw)) => out.push(raw),
        Some(TweetResult::Unrecognized) => {
            debug!(entry_id = %entry_id, "Skipping unrecognized post record");
        }
        None => debug!(entry_id = %entry_id, "Skipping entry without post record"),
    }
}

/// Turn a raw post record into a [`Post`], or `None` if it belongs to a
/// different author than the one being crawled.
fn extract_post(raw: Value, username: &str) -> Result<Option<Post>> {
    let fields = PostFields::deserialize(&raw).context("Malformed post record")?;

    let screen_name = fields.core.user_results.result.core.screen_name;
    if screen_name != username {
        info!(
            id = %fields.rest_id,
            author = %screen_name,
            "Skipping post from another account"
        );
        return Ok(None);
    }

    let created_at = parse_created_at(&fields.legacy.created_at).with_context(|| {
        format!("Post {} has an invalid created_at", fields.rest_id)
    })?;

    let attachments = fields
        .legacy
        .extended_entities
        .media
        .into_iter()
        .map(|m| Attachment {
            post_id: fields.rest_id.clone(),
            kind: m.kind,
            url: m.media_url_https,
        })
        .collect();

    Ok(Some(Post {
        id: fields.rest_id,
        username: screen_name,
        created_at,
        attachments,
        raw_data: raw,
    }))
}

fn parse_created_at(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_str(raw, CREATED_AT_FORMAT)?;
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_post(id: &str, screen_name: &str) -> Value {
        json!({
            "__typename": "Tweet",
            "rest_id": id,
            "core": {
                "user_results": {
                    "result": {
                        "core": {"screen_name": screen_name, "name": "Display"},
                        "legacy": {"description": "bio"},
                        "avatar": {"image_url": "https://pbs.twimg.com/profile_images/1/a.jpg"}
                    }
                }
            },
            "legacy": {
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "full_text": "hello",
                "extended_entities": {
                    "media": [
                        {"type": "photo", "media_url_https": format!("https://pbs.twimg.com/media/{id}.jpg")}
                    ]
                }
            }
        })
    }

    fn item_entry(id: &str, screen_name: &str) -> Value {
        json!({
            "entryId": format!("tweet-{id}"),
            "content": {
                "__typename": "TimelineTimelineItem",
                "itemContent": {
                    "__typename": "TimelineTweet",
                    "tweet_results": {"result": raw_post(id, screen_name)}
                }
            }
        })
    }

    fn timeline_body(entries: Vec<Value>) -> Value {
        json!({
            "data": {"user": {"result": {"timeline": {"timeline": {
                "instructions": [
                    {"type": "TimelineClearCache"},
                    {"type": "TimelineAddEntries", "entries": entries}
                ]
            }}}}}
        })
    }

    fn cursor_entry(kind: &str, value: &str) -> Value {
        json!({
            "entryId": format!("cursor-{kind}"),
            "content": {
                "__typename": "TimelineTimelineCursor",
                "cursorType": kind,
                "value": value
            }
        })
    }

    #[test]
    fn test_parses_item_entries_and_bottom_cursor() {
        let body = timeline_body(vec![
            item_entry("1", "alice"),
            item_entry("2", "alice"),
            cursor_entry("Top", "TOP-CURSOR"),
            cursor_entry("Bottom", "BOTTOM-CURSOR"),
        ]);

        let page = parse_timeline_page(&body, "alice").unwrap();
        assert_eq!(page.posts.len(), 2);
        assert_eq!(page.posts[0].id, "1");
        assert_eq!(page.posts[1].id, "2");
        assert_eq!(page.next_cursor.as_deref(), Some("BOTTOM-CURSOR"));

        let first = &page.posts[0];
        assert_eq!(first.username, "alice");
        assert_eq!(first.created_at.to_rfc3339(), "2018-10-10T20:19:24+00:00");
        assert_eq!(first.attachments.len(), 1);
        assert_eq!(first.attachments[0].kind, MediaKind::Photo);
        assert_eq!(first.attachments[0].post_id, "1");
        assert_eq!(first.raw_data["rest_id"], "1");
    }

    #[test]
    fn test_module_entries_yield_posts() {
        let module = json!({
            "entryId": "conversation-9",
            "content": {
                "__typename": "TimelineTimelineModule",
                "items": [
                    {"item": {"itemContent": {
                        "__typename": "TimelineTweet",
                        "tweet_results": {"result": raw_post("9", "alice")}
                    }}},
                    {"item": {"itemContent": {"__typename": "TimelineLabel"}}}
                ]
            }
        });
        let page = parse_timeline_page(&timeline_body(vec![module]), "alice").unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].id, "9");
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_visibility_wrapper_unwraps_to_inner_post() {
        let wrapped = json!({
            "entryId": "tweet-7",
            "content": {
                "__typename": "TimelineTimelineItem",
                "itemContent": {
                    "__typename": "TimelineTweet",
                    "tweet_results": {"result": {
                        "__typename": "TweetWithVisibilityResults",
                        "tweet": raw_post("7", "alice")
                    }}
                }
            }
        });
        let page = parse_timeline_page(&timeline_body(vec![wrapped]), "alice").unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].id, "7");
        // raw_data is the unwrapped inner record
        assert_eq!(page.posts[0].raw_data["rest_id"], "7");
    }

    #[test]
    fn test_foreign_author_is_dropped() {
        let body = timeline_body(vec![
            item_entry("1", "alice"),
            item_entry("2", "mallory"),
        ]);
        let page = parse_timeline_page(&body, "alice").unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].id, "1");
    }

    #[test]
    fn test_unrecognized_variants_are_skipped() {
        let body = timeline_body(vec![
            json!({
                "entryId": "promoted-1",
                "content": {"__typename": "TimelinePromotedItem", "something": 1}
            }),
            json!({
                "entryId": "tombstone-2",
                "content": {
                    "__typename": "TimelineTimelineItem",
                    "itemContent": {
                        "__typename": "TimelineTweet",
                        "tweet_results": {"result": {"__typename": "TweetTombstone"}}
                    }
                }
            }),
            item_entry("3", "alice"),
        ]);
        let page = parse_timeline_page(&body, "alice").unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].id, "3");
    }

    #[test]
    fn test_post_without_media_has_no_attachments() {
        let mut post = raw_post("5", "alice");
        post["legacy"]
            .as_object_mut()
            .unwrap()
            .remove("extended_entities");
        let entry = json!({
            "entryId": "tweet-5",
            "content": {
                "__typename": "TimelineTimelineItem",
                "itemContent": {
                    "__typename": "TimelineTweet",
                    "tweet_results": {"result": post}
                }
            }
        });
        let page = parse_timeline_page(&timeline_body(vec![entry]), "alice").unwrap();
        assert!(page.posts[0].attachments.is_empty());
    }

    #[test]
    fn test_rejects_non_timeline_body() {
        assert!(parse_timeline_page(&json!({"errors": []}), "alice").is_err());
    }
}
