use std::fmt;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Unique key for a video on the host platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VideoId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for VideoId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Server-assigned identifier of a single title or thumbnail submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrandingUuid(String);

impl BrandingUuid {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh placeholder for a local draft that has no server identity yet.
    pub fn placeholder() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A proposed alternate title with its vote metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleCandidate {
    pub title: String,
    /// The candidate is the video's own title, i.e. "keep the original".
    #[serde(default)]
    pub original: bool,
    #[serde(default)]
    pub votes: i32,
    #[serde(default)]
    pub locked: bool,
    #[serde(rename = "UUID")]
    pub uuid: BrandingUuid,
}

/// A proposed thumbnail, expressed as a timestamp into the video.
///
/// `timestamp` is absent when `original` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailCandidate {
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub original: bool,
    #[serde(default)]
    pub votes: i32,
    #[serde(default)]
    pub locked: bool,
    #[serde(rename = "UUID")]
    pub uuid: BrandingUuid,
}

impl ThumbnailCandidate {
    /// Timestamp to render, or `None` when the original thumbnail should be kept.
    pub fn render_timestamp(&self) -> Option<f64> {
        if self.original {
            None
        } else {
            self.timestamp
        }
    }
}

/// Candidates the branding server holds for one video, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandingResult {
    #[serde(default)]
    pub titles: Vec<TitleCandidate>,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailCandidate>,
    #[serde(default)]
    pub random_time: Option<f64>,
    #[serde(default)]
    pub video_duration: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branding_result_parses_server_shape() {
        let json = serde_json::json!({
            "titles": [
                {"title": "A better title", "original": false, "votes": 3, "locked": false, "UUID": "t1"}
            ],
            "thumbnails": [
                {"timestamp": 12.5, "original": false, "votes": 1, "locked": true, "UUID": "th1"},
                {"original": true, "votes": 0, "locked": false, "UUID": "th2"}
            ],
            "randomTime": 0.42,
            "videoDuration": null
        });

        let parsed: BrandingResult = serde_json::from_value(json).expect("should parse");
        assert_eq!(parsed.titles[0].title, "A better title");
        assert_eq!(parsed.titles[0].uuid.as_str(), "t1");
        assert_eq!(parsed.thumbnails[0].render_timestamp(), Some(12.5));
        assert!(parsed.thumbnails[0].locked);
        assert_eq!(parsed.thumbnails[1].render_timestamp(), None);
        assert_eq!(parsed.random_time, Some(0.42));
        assert!(parsed.video_duration.is_none());
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let parsed: BrandingResult = serde_json::from_str("{}").expect("should parse");
        assert!(parsed.titles.is_empty());
        assert!(parsed.thumbnails.is_empty());
    }

    #[test]
    fn placeholder_uuids_are_unique() {
        assert_ne!(BrandingUuid::placeholder(), BrandingUuid::placeholder());
    }

    #[test]
    fn video_id_displays_raw_value() {
        let id = VideoId::from("abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
    }
}
