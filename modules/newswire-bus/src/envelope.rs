use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One candidate item published on the `items` channel by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEnvelope {
    pub source_id: i64,
    pub source_name: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

/// One delivered notification published on the `notifications` channel for
/// downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub chat_id: i64,
    pub news_id: i64,
    pub source_id: i64,
    pub source_name: String,
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_item_envelope_json_round_trip() {
        let env = ItemEnvelope {
            source_id: 7,
            source_name: "Wire".into(),
            title: "T".into(),
            description: "D".into(),
            link: "https://x/a".into(),
            published_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let json = serde_json::to_string(&env).unwrap();
        // Publication instant travels as an ISO-like string
        assert!(json.contains("2024-05-01T12:00:00Z"));
        let back: ItemEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_notification_envelope_fields() {
        let env = NotificationEnvelope {
            chat_id: 100,
            news_id: 42,
            source_id: 7,
            source_name: "Wire".into(),
            title: "T".into(),
            link: "https://x/a".into(),
            published_at: Utc::now(),
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["chat_id"], 100);
        assert_eq!(json["news_id"], 42);
        assert_eq!(json["source_id"], 7);
    }
}
