use super::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Playback state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Playing,
    Played,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 3] = [Self::Pending, Self::Playing, Self::Played];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Playing => "playing",
            Self::Played => "played",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "playing" => Ok(Self::Playing),
            "played" => Ok(Self::Played),
            other => Err(StoreError::validation(format!(
                "status must be one of pending, playing, played (got '{}')",
                other
            ))),
        }
    }
}

/// A stored song request.
///
/// Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub title: String,
    pub artist: String,
    pub requester: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Candidate passed to `create`. The store assigns id, status and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewRequest {
    pub title: String,
    pub artist: String,
    pub requester: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl NewRequest {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            requester: requester.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Checks the required text fields. Callers run this before `create`;
    /// the store itself accepts whatever it is given.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("title", &self.title),
            ("artist", &self.artist),
            ("requester", &self.requester),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::validation(format!("{} is required", field)));
            }
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: u64, created_at: DateTime<Utc>) -> Record {
        Record {
            id,
            title: self.title,
            artist: self.artist,
            requester: self.requester,
            status: RequestStatus::Pending,
            created_at,
            url: self.url.filter(|url| !url.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("playing".parse::<RequestStatus>().unwrap(), RequestStatus::Playing);
        assert_eq!(" Played ".parse::<RequestStatus>().unwrap(), RequestStatus::Played);
        assert!(matches!(
            "skipped".parse::<RequestStatus>(),
            Err(StoreError::Validation(_))
        ));

        for status in RequestStatus::ALL {
            assert_eq!(status.to_string().parse::<RequestStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_record_json_shape() {
        let record = NewRequest::new("A", "Artist1", "Bob")
            .into_record(7, "2024-05-01T12:30:00Z".parse().unwrap());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["id"], 7);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["created_at"], "2024-05-01T12:30:00Z");
        assert!(json.get("url").is_none());
    }

    #[test]
    fn test_empty_url_is_dropped() {
        let record = NewRequest::new("A", "B", "C")
            .with_url("")
            .into_record(1, Utc::now());
        assert_eq!(record.url, None);

        let record = NewRequest::new("A", "B", "C")
            .with_url("https://example.com/a.mp3")
            .into_record(1, Utc::now());
        assert_eq!(record.url.as_deref(), Some("https://example.com/a.mp3"));
    }

    #[test]
    fn test_record_accepts_offset_timestamps() {
        let raw = r#"{"id":3,"title":"T","artist":"A","requester":"R","status":"played","created_at":"2024-05-01T20:30:00.123456789+08:00"}"#;
        let record: Record = serde_json::from_str(raw).unwrap();
        assert_eq!(record.status, RequestStatus::Played);
        assert_eq!(record.created_at.to_rfc3339(), "2024-05-01T12:30:00.123456789+00:00");
        assert_eq!(record.url, None);
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(NewRequest::new("A", "B", "C").validate().is_ok());
        let err = NewRequest::new("A", "  ", "C").validate().unwrap_err();
        assert!(err.to_string().contains("artist"));
    }
}
