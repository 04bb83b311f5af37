//! Cursor threading.
//!
//! The timeline API encodes its pagination position inside the `variables`
//! query parameter, a URL-encoded JSON object. Advancing to the next page
//! means decoding that object, overwriting its `cursor` field, and
//! reassembling the URL with every other parameter untouched and in order.

use anyhow::{Context, Result};
use serde_json::Value;
use url::Url;

/// Rewrite `api_url` so its `variables.cursor` is `next_cursor`.
///
/// `None` writes an explicit JSON null, matching a start-of-feed request.
///
/// # Errors
///
/// Returns an error if the URL cannot be parsed, has no `variables`
/// parameter, or its `variables` value is not a JSON object.
pub fn advance_cursor_url(api_url: &str, next_cursor: Option<&str>) -> Result<String> {
    let mut url = Url::parse(api_url).context("Failed to parse timeline request URL")?;

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let mut rewritten = Vec::with_capacity(pairs.len());
    let mut seen_variables = false;

    for (name, value) in pairs {
        if name == "variables" {
            seen_variables = true;
            let mut variables: Value = serde_json::from_str(&value)
                .context("Failed to decode the variables query parameter")?;
            let object = variables
                .as_object_mut()
                .context("The variables query parameter is not a JSON object")?;
            object.insert(
                "cursor".to_string(),
                next_cursor.map_or(Value::Null, |c| Value::String(c.to_string())),
            );
            rewritten.push((name, serde_json::to_string(&variables)?));
        } else {
            rewritten.push((name, value));
        }
    }

    if !seen_variables {
        anyhow::bail!("Timeline request URL has no variables query parameter");
    }

    url.query_pairs_mut().clear().extend_pairs(rewritten);
    Ok(url.into())
}
