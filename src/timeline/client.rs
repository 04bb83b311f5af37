//! Timeline feed client.
//!
//! The first page is fetched by navigating a live browser page to the
//! account's timeline and capturing the GraphQL response the page issues
//! itself, together with the originating request headers. Every later page
//! replays that request directly over HTTP with the cursor rewritten into
//! the URL, so the browser is only needed once per account.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, RequestId,
};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::browser::BrowserSession;
use crate::config::Config;
use crate::crawl::TimelineSource;
use crate::timeline::cursor::advance_cursor_url;
use crate::timeline::parse::parse_timeline_page;
use crate::timeline::{PageResult, PaginationCursor};

/// Marker every timeline API URL contains.
pub const GRAPHQL_MARKER: &str = "graphql";

/// GraphQL operation the timeline page issues for posts-with-replies.
pub const TIMELINE_OPERATION: &str = "/UserTweetsAndReplies?";

fn is_timeline_response_url(url: &str) -> bool {
    url.contains(GRAPHQL_MARKER) && url.contains(TIMELINE_OPERATION)
}

pub struct TimelineClient {
    page: Page,
    http: reqwest::Client,
    page_timeout: Duration,
}

impl TimelineClient {
    /// Build a client around an already-launched browser session.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(session: &BrowserSession, config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            page: session.page().clone(),
            http,
            page_timeout: config.page_timeout,
        })
    }

    /// Navigate to the account timeline and capture the GraphQL response the
    /// page issues, returning `(request_url, replay_headers, body)`.
    async fn capture_first_page(
        &self,
        username: &str,
    ) -> Result<(String, Vec<(String, String)>, Value)> {
        let url = format!("https://x.com/{username}/with_replies");
        info!(url = %url, "Fetching first timeline page via browser");

        self.page
            .execute(EnableParams::default())
            .await
            .context("Failed to enable network events")?;

        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .context("Failed to listen for request events")?;
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to listen for response events")?;
        let mut completions = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("Failed to listen for loading events")?;

        self.page
            .goto(url)
            .await
            .context("Failed to navigate to timeline")?;

        let capture = async {
            // Headers seen on outgoing timeline requests, by request id.
            let mut sent_headers: Vec<(RequestId, Value)> = Vec::new();
            // The first timeline response observed.
            let mut matched: Option<(RequestId, String, Option<Value>)> = None;
            // Requests whose body is already fully loaded.
            let mut finished: Vec<RequestId> = Vec::new();

            loop {
                tokio::select! {
                    Some(event) = requests.next() => {
                        if is_timeline_response_url(&event.request.url) {
                            if let Ok(headers) = serde_json::to_value(&event.request.headers) {
                                sent_headers.push((event.request_id.clone(), headers));
                            }
                        }
                    }
                    Some(event) = responses.next() => {
                        if matched.is_none() && is_timeline_response_url(&event.response.url) {
                            let request_headers = event
                                .response
                                .request_headers
                                .as_ref()
                                .and_then(|h| serde_json::to_value(h).ok());
                            let already_loaded = finished.contains(&event.request_id);
                            matched = Some((
                                event.request_id.clone(),
                                event.response.url.clone(),
                                request_headers,
                            ));
                            if already_loaded {
                                break;
                            }
                        }
                    }
                    Some(event) = completions.next() => {
                        match &matched {
                            Some((id, _, _)) if *id == event.request_id => break,
                            _ => finished.push(event.request_id.clone()),
                        }
                    }
                    else => anyhow::bail!(
                        "Browser event streams ended before a timeline response was seen"
                    ),
                }
            }
            Ok::<_, anyhow::Error>((sent_headers, matched))
        };

        let (sent_headers, matched) = tokio::time::timeout(self.page_timeout, capture)
            .await
            .context("Timed out waiting for the timeline response")??;
        let (request_id, api_url, response_headers) =
            matched.context("Navigation finished without a timeline response")?;

        let sent = sent_headers
            .iter()
            .find(|(id, _)| *id == request_id)
            .or_else(|| sent_headers.first())
            .map(|(_, headers)| headers);
        let mut headers = merge_headers(sent, response_headers.as_ref());

        // The capture may lack the cookie header (CDP reports provisional
        // headers for some requests); rebuild it from the live jar so the
        // replayed requests stay authenticated.
        if !headers.iter().any(|(name, _)| name == "cookie") {
            let cookies = self
                .page
                .get_cookies()
                .await
                .context("Failed to read browser cookies")?;
            if !cookies.is_empty() {
                let jar = cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value))
                    .collect::<Vec<_>>()
                    .join("; ");
                headers.push(("cookie".to_string(), jar));
            }
        }

        let body = self
            .page
            .execute(GetResponseBodyParams::new(request_id))
            .await
            .context("Failed to read the timeline response body")?;
        let bytes = if body.base64_encoded {
            BASE64
                .decode(body.body.as_bytes())
                .context("Failed to decode the timeline response body")?
        } else {
            body.body.clone().into_bytes()
        };
        let body: Value = serde_json::from_slice(&bytes)
            .context("Failed to parse the timeline response body")?;

        debug!(api_url = %api_url, headers = headers.len(), "Captured timeline request");
        Ok((api_url, headers, body))
    }

    /// Replay a captured request directly, `(request_url, headers, body)`.
    async fn replay_request(
        &self,
        cursor: PaginationCursor,
    ) -> Result<(String, Vec<(String, String)>, Value)> {
        info!(url = %cursor.url, "Fetching timeline page via API replay");

        let mut request = self.http.get(&cursor.url);
        for (name, value) in &cursor.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .context("Failed to replay timeline request")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Timeline replay failed with status {status}");
        }
        let body = response
            .json()
            .await
            .context("Failed to parse the timeline response body")?;
        Ok((cursor.url, cursor.headers, body))
    }
}

#[async_trait]
impl TimelineSource for TimelineClient {
    async fn fetch_page(
        &mut self,
        username: &str,
        cursor: Option<PaginationCursor>,
    ) -> Result<PageResult> {
        let (api_url, headers, body) = match cursor {
            None => self.capture_first_page(username).await?,
            Some(cursor) => self.replay_request(cursor).await?,
        };

        let parsed = parse_timeline_page(&body, username)?;

        // No bottom cursor means the feed is exhausted.
        let cursor = match parsed.next_cursor {
            Some(value) => Some(PaginationCursor {
                url: advance_cursor_url(&api_url, Some(&value))?,
                headers,
            }),
            None => None,
        };

        Ok(PageResult {
            posts: parsed.posts,
            cursor,
        })
    }
}

/// Merge captured header maps into a replayable list, later sources
/// overriding earlier ones. HTTP/2 pseudo-headers are dropped.
fn merge_headers(sent: Option<&Value>, received: Option<&Value>) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for source in [sent, received].into_iter().flatten() {
        let Some(map) = source.as_object() else {
            continue;
        };
        for (name, value) in map {
            if name.starts_with(':') {
                continue;
            }
            let Some(value) = value.as_str() else {
                continue;
            };
            let name = name.to_ascii_lowercase();
            if let Some(slot) = merged.iter_mut().find(|(n, _)| *n == name) {
                slot.1 = value.to_string();
            } else {
                merged.push((name, value.to_string()));
            }
        }
    }
    merged
}
