use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of media attached to a post, as reported by the timeline API.
///
/// Kinds the API may grow in the future round-trip through `Other` so the
/// derived local filename stays faithful to the upstream value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedGif,
    Other(String),
}

impl MediaKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::AnimatedGif => "animated_gif",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for MediaKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "photo" => Self::Photo,
            "video" => Self::Video,
            "animated_gif" => Self::AnimatedGif,
            _ => Self::Other(value),
        }
    }
}

impl From<MediaKind> for String {
    fn from(value: MediaKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single media attachment referenced by a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub post_id: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
}

impl Attachment {
    /// Deterministic local filename for the downloaded bytes.
    ///
    /// Doubles as the on-disk dedup key: a file of this name already present
    /// means the attachment has been downloaded.
    #[must_use]
    pub fn local_filename(&self) -> String {
        let segment = self.url.rsplit('/').next().unwrap_or(&self.url);
        format!("{}.{}.{}", self.post_id, self.kind, segment)
    }
}

/// An archived post. Immutable once persisted; identity is `(username, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// The raw timeline record as returned by the API.
    pub raw_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_round_trip() {
        let photo: MediaKind = "photo".to_string().into();
        assert_eq!(photo, MediaKind::Photo);
        assert_eq!(photo.as_str(), "photo");

        let gif: MediaKind = "animated_gif".to_string().into();
        assert_eq!(gif, MediaKind::AnimatedGif);

        // Unknown kinds are preserved verbatim
        let other: MediaKind = "live_stream".to_string().into();
        assert_eq!(other, MediaKind::Other("live_stream".to_string()));
        assert_eq!(other.as_str(), "live_stream");
    }

    #[test]
    fn test_media_kind_serde() {
        let kind: MediaKind = serde_json::from_str(r#""video""#).unwrap();
        assert_eq!(kind, MediaKind::Video);
        assert_eq!(serde_json::to_string(&kind).unwrap(), r#""video""#);

        let other: MediaKind = serde_json::from_str(r#""hologram""#).unwrap();
        assert_eq!(serde_json::to_string(&other).unwrap(), r#""hologram""#);
    }

    #[test]
    fn test_local_filename() {
        let attachment = Attachment {
            post_id: "123".to_string(),
            kind: MediaKind::Photo,
            url: "https://pbs.twimg.com/media/ABC123.jpg".to_string(),
        };
        assert_eq!(attachment.local_filename(), "123.photo.ABC123.jpg");
    }

    #[test]
    fn test_attachment_serializes_kind_as_type() {
        let attachment = Attachment {
            post_id: "1".to_string(),
            kind: MediaKind::Video,
            url: "https://example.com/v.mp4".to_string(),
        };
        let json = serde_json::to_value(&attachment).unwrap();
        assert_eq!(json["type"], "video");
        assert!(json.get("kind").is_none());
    }
}
