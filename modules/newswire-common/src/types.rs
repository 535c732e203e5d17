use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a syndication source. Only active sources are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Inactive,
    Archived,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Active => write!(f, "active"),
            SourceStatus::Inactive => write!(f, "inactive"),
            SourceStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown SourceStatus: {other}")),
        }
    }
}

/// Per-item scrape progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeStatus::Pending => write!(f, "pending"),
            ScrapeStatus::Success => write!(f, "success"),
            ScrapeStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ScrapeStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown ScrapeStatus: {other}")),
        }
    }
}

/// One entry parsed from a feed, before storage assigns it an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemCandidate {
    pub title: String,
    pub description: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

/// Payload extracted from an article page by the scraper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedArticle {
    pub full_text: String,
    pub author: String,
    pub category: String,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub meta_keywords: String,
    pub meta_description: String,
    pub meta_data: serde_json::Value,
    pub content_html: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_source_status_round_trip() {
        for s in [SourceStatus::Active, SourceStatus::Inactive, SourceStatus::Archived] {
            assert_eq!(SourceStatus::from_str(&s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn test_scrape_status_round_trip() {
        for s in [ScrapeStatus::Pending, ScrapeStatus::Success, ScrapeStatus::Failed] {
            assert_eq!(ScrapeStatus::from_str(&s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(SourceStatus::from_str("deleted").is_err());
        assert!(ScrapeStatus::from_str("done").is_err());
    }
}
