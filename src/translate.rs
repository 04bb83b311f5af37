//! Machine-translated sidecar files.
//!
//! After a crawl, each stored post can be joined by `{id}.{lang}.json`
//! sidecars produced by an OpenAI-compatible chat-completions endpoint.
//! An existing sidecar is never re-requested unless force is set. Provider
//! overload ends the pass cleanly so completed translations are kept.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::accounts::Account;
use crate::config::Config;

/// Display names for the languages a deployment is likely to configure;
/// unknown codes fall back to the code itself in the prompt.
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("de", "German"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("zh", "Chinese"),
];

fn language_name(code: &str) -> &str {
    LANGUAGE_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map_or(code, |(_, name)| *name)
}

/// How a translation pass ended.
#[derive(Debug, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    /// The provider signalled overload; the pass stopped early and keeps
    /// whatever it finished.
    ProviderOverloaded,
}

enum TranslateStatus {
    Written,
    Skipped,
    Overloaded,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

pub struct Translator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    languages: Vec<String>,
    force: bool,
}

impl Translator {
    /// Build a translator from configuration, or `None` when no target
    /// languages are configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the API key
    /// is missing despite configured languages.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if config.translate_languages.is_empty() {
            return Ok(None);
        }
        let api_key = config
            .translate_api_key
            .clone()
            .context("TRANSLATE_API_KEY is required when translation is enabled")?;
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Some(Self {
            client,
            base_url: config.translate_api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.translate_model.clone(),
            languages: config.translate_languages.clone(),
            force: config.translate_force,
        }))
    }

    /// Translate every stored post of every account into every configured
    /// language.
    ///
    /// # Errors
    ///
    /// Provider overload is not an error; any other failure propagates and
    /// aborts the run.
    pub async fn run(&self, data_dir: &Path, accounts: &[Account]) -> Result<PassOutcome> {
        for account in accounts {
            let username = &account.x.screen_name;
            let posts_dir = data_dir.join("posts").join("x").join(username);
            if !posts_dir.is_dir() {
                debug!(username, "No stored posts to translate");
                continue;
            }
            info!(username, "Translating stored posts");

            for post_id in list_post_ids(&posts_dir).await? {
                for lang in &self.languages {
                    match self.translate_post(&posts_dir, &post_id, lang).await? {
                        TranslateStatus::Written => {
                            info!(post_id, lang, "Translation written");
                        }
                        TranslateStatus::Skipped => {}
                        TranslateStatus::Overloaded => {
                            warn!(
                                post_id,
                                lang, "Translation provider overloaded, stopping this run"
                            );
                            return Ok(PassOutcome::ProviderOverloaded);
                        }
                    }
                }
            }
        }
        Ok(PassOutcome::Completed)
    }

    async fn translate_post(
        &self,
        posts_dir: &Path,
        post_id: &str,
        lang: &str,
    ) -> Result<TranslateStatus> {
        let sidecar = posts_dir.join(format!("{post_id}.{lang}.json"));
        if !self.force && sidecar.exists() {
            debug!(post_id, lang, "Translation already exists");
            return Ok(TranslateStatus::Skipped);
        }

        let post_path = posts_dir.join(format!("{post_id}.json"));
        let raw = tokio::fs::read_to_string(&post_path)
            .await
            .with_context(|| format!("Failed to read post {}", post_path.display()))?;
        let post: Value = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse post {}", post_path.display()))?;
        let text = post
            .pointer("/raw_data/legacy/full_text")
            .and_then(Value::as_str)
            .with_context(|| format!("Post {post_id} has no text to translate"))?;

        let lang_name = language_name(lang);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(lang_name),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Translate the following text to {lang_name}:\n\n{text}"),
                },
            ],
            temperature: 0.2,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to reach the translation provider")?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(TranslateStatus::Overloaded);
        }
        if !status.is_success() {
            anyhow::bail!("Translation request failed with status {status}");
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse the translation response")?;
        let translated = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .context("Translation response carried no content")?;

        let sidecar_doc = json!({
            "id": post_id,
            "translated_text": translated,
            "lang": lang,
            "raw_data": body,
        });
        tokio::fs::write(&sidecar, serde_json::to_string_pretty(&sidecar_doc)?)
            .await
            .with_context(|| format!("Failed to write translation {}", sidecar.display()))?;

        Ok(TranslateStatus::Written)
    }
}

fn system_prompt(lang_name: &str) -> String {
    format!(
        "You are a helpful assistant that translates text to {lang_name}.\n\
         Your task is to translate the text provided by the user into {lang_name} \
         while preserving the original meaning and context. You should not add any \
         additional information or change the tone of the text. Please ensure that \
         the translation is accurate and natural-sounding in {lang_name}.\n"
    )
}

/// Post ids in a directory: `{id}.json` files whose stem carries no further
/// dot (those are translation sidecars).
async fn list_post_ids(posts_dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut entries = tokio::fs::read_dir(posts_dir)
        .await
        .with_context(|| format!("Failed to list {}", posts_dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".json") else {
            continue;
        };
        if stem.contains('.') {
            continue;
        }
        ids.push(stem.to_string());
    }
    ids.sort();
    Ok(ids)
}

/// Path of the sidecar a translation produces.
#[must_use]
pub fn sidecar_path(posts_dir: &Path, post_id: &str, lang: &str) -> PathBuf {
    posts_dir.join(format!("{post_id}.{lang}.json"))
}
