//! REST client for the branding server.
//!
//! Wraps `GET /api/branding/{hashPrefix}`, `GET /api/branding?videoID=…`
//! and `POST /api/branding` using [`reqwest`]. The [`BrandingSource`] trait
//! is the seam the metadata cache fetches through, so the cache can be
//! driven by an in-memory source in tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use rebrand_core::hashing::hash_prefix;
use rebrand_core::{BrandingResult, VideoId};

/// Where branding records come from and where submissions go.
#[async_trait]
pub trait BrandingSource: Send + Sync + 'static {
    /// Fetch the records for `video_id`.
    ///
    /// With `by_hash`, the whole hash bucket containing `video_id` is
    /// fetched and the returned map may hold several identifiers.
    async fn fetch_branding(
        &self,
        video_id: &VideoId,
        by_hash: bool,
    ) -> Result<HashMap<VideoId, BrandingResult>, BrandingApiError>;

    /// Submit a title and/or thumbnail vote for `video_id`.
    async fn submit_branding(&self, submission: &BrandingSubmission)
        -> Result<(), BrandingApiError>;
}

/// Title part of a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleSubmission {
    pub title: String,
    pub original: bool,
}

/// Thumbnail part of a submission. `timestamp` is omitted for the original
/// thumbnail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThumbnailSubmission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    pub original: bool,
}

/// Body of `POST /api/branding`.
#[derive(Debug, Clone, Serialize)]
pub struct BrandingSubmission {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "videoID")]
    pub video_id: VideoId,
    pub title: Option<TitleSubmission>,
    pub thumbnail: Option<ThumbnailSubmission>,
}

/// Errors from the branding REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum BrandingApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a status that is neither success nor 404.
    #[error("Branding API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// The body could not be parsed as branding JSON.
    #[error("Failed to parse branding response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// HTTP client for the branding server.
pub struct BrandingApi {
    client: reqwest::Client,
    server_url: String,
}

impl BrandingApi {
    /// Create a client for the server at `server_url`
    /// (e.g. `https://sponsor.ajay.app`), applying `timeout` to every request.
    pub fn new(server_url: String, timeout: Duration) -> Result<Self, BrandingApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, server_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, server_url: String) -> Self {
        Self { client, server_url }
    }

    /// Fetch every record in the hash bucket of `video_id`.
    pub async fn fetch_by_hash(
        &self,
        video_id: &VideoId,
    ) -> Result<HashMap<VideoId, BrandingResult>, BrandingApiError> {
        let prefix = hash_prefix(video_id.as_str());
        let response = self
            .client
            .get(format!("{}/api/branding/{prefix}", self.server_url))
            .send()
            .await?;

        let body = Self::readable_body(response).await?;
        parse_bucket(&body)
    }

    /// Fetch the record of a single video.
    pub async fn fetch_by_id(
        &self,
        video_id: &VideoId,
    ) -> Result<HashMap<VideoId, BrandingResult>, BrandingApiError> {
        let response = self
            .client
            .get(format!("{}/api/branding", self.server_url))
            .query(&[("videoID", video_id.as_str())])
            .send()
            .await?;

        let body = Self::readable_body(response).await?;
        parse_single(video_id, &body)
    }

    /// Send a submission with `POST /api/branding`.
    pub async fn submit(&self, submission: &BrandingSubmission) -> Result<(), BrandingApiError> {
        let response = self
            .client
            .post(format!("{}/api/branding", self.server_url))
            .json(submission)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BrandingApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    // ---- private helpers ----

    /// Return the body text of a success or 404 response; any other status
    /// is an [`BrandingApiError::ApiError`].
    async fn readable_body(response: reqwest::Response) -> Result<String, BrandingApiError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        if !is_readable_status(status) {
            return Err(BrandingApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl BrandingSource for BrandingApi {
    async fn fetch_branding(
        &self,
        video_id: &VideoId,
        by_hash: bool,
    ) -> Result<HashMap<VideoId, BrandingResult>, BrandingApiError> {
        if by_hash {
            self.fetch_by_hash(video_id).await
        } else {
            self.fetch_by_id(video_id).await
        }
    }

    async fn submit_branding(
        &self,
        submission: &BrandingSubmission,
    ) -> Result<(), BrandingApiError> {
        self.submit(submission).await
    }
}

/// The server answers 404 for buckets/videos without submissions; the body is
/// still meaningful.
fn is_readable_status(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_FOUND
}

fn parse_bucket(body: &str) -> Result<HashMap<VideoId, BrandingResult>, BrandingApiError> {
    Ok(serde_json::from_str(body)?)
}

fn parse_single(
    video_id: &VideoId,
    body: &str,
) -> Result<HashMap<VideoId, BrandingResult>, BrandingApiError> {
    let result: BrandingResult = serde_json::from_str(body)?;
    Ok(HashMap::from([(video_id.clone(), result)]))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn not_found_is_readable() {
        assert!(is_readable_status(StatusCode::OK));
        assert!(is_readable_status(StatusCode::NOT_FOUND));
        assert!(!is_readable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_readable_status(StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn bucket_body_maps_every_identifier() {
        let body = r#"{
            "abc123": {"titles": [{"title": "One", "votes": 2, "UUID": "a"}], "thumbnails": []},
            "xyz789": {"titles": [], "thumbnails": [{"timestamp": 4.0, "UUID": "b"}]}
        }"#;
        let parsed = parse_bucket(body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&VideoId::from("abc123")].titles[0].title, "One");
        assert_eq!(
            parsed[&VideoId::from("xyz789")].thumbnails[0].timestamp,
            Some(4.0)
        );
    }

    #[test]
    fn single_body_is_keyed_by_requested_id() {
        let id = VideoId::from("abc123");
        let parsed = parse_single(&id, r#"{"titles": [], "thumbnails": []}"#).unwrap();
        assert!(parsed.contains_key(&id));
    }

    #[test]
    fn garbage_body_is_a_parse_error() {
        assert_matches!(parse_bucket("Not Found"), Err(BrandingApiError::Parse(_)));
    }

    #[test]
    fn submission_serializes_server_field_names() {
        let submission = BrandingSubmission {
            user_id: "user".into(),
            video_id: VideoId::from("abc123"),
            title: Some(TitleSubmission {
                title: "New".into(),
                original: false,
            }),
            thumbnail: Some(ThumbnailSubmission {
                timestamp: None,
                original: true,
            }),
        };
        let json = serde_json::to_value(&submission).unwrap();
        assert_eq!(json["userID"], "user");
        assert_eq!(json["videoID"], "abc123");
        assert_eq!(json["title"]["title"], "New");
        assert!(json["thumbnail"].get("timestamp").is_none());
    }
}
