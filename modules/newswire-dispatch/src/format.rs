//! Digest message composition: one Markdown message per subscriber, items
//! numbered in insertion order with a relative age per entry.

use chrono::{DateTime, Utc};

use crate::dispatcher::PendingNotification;

/// Human-readable age of a publication instant: minutes under an hour, hours
/// under a day, days beyond that.
pub fn relative_age(published_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - published_at).num_minutes().max(0);
    if minutes < 60 {
        format!("{minutes} мин")
    } else if minutes < 24 * 60 {
        format!("{} ч", minutes / 60)
    } else {
        format!("{} дн", minutes / (24 * 60))
    }
}

/// Compose the batched digest for one subscriber.
pub fn compose_digest(items: &[PendingNotification], now: DateTime<Utc>) -> String {
    let mut lines = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        lines.push(format!(
            "{}. {}   [{}]({}) • {}",
            index + 1,
            item.title,
            item.source_name,
            item.link,
            relative_age(item.published_at, now),
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending(title: &str, link: &str, age_minutes: i64, now: DateTime<Utc>) -> PendingNotification {
        PendingNotification {
            news_id: 1,
            source_id: 7,
            title: title.to_string(),
            link: link.to_string(),
            published_at: now - Duration::minutes(age_minutes),
            source_name: "S".to_string(),
            source_url: "https://s".to_string(),
        }
    }

    #[test]
    fn test_relative_age_units() {
        let now = Utc::now();
        assert_eq!(relative_age(now - Duration::minutes(15), now), "15 мин");
        assert_eq!(relative_age(now - Duration::minutes(90), now), "1 ч");
        assert_eq!(relative_age(now - Duration::hours(23), now), "23 ч");
        assert_eq!(relative_age(now - Duration::days(3), now), "3 дн");
        // Clock skew never yields a negative age
        assert_eq!(relative_age(now + Duration::minutes(5), now), "0 мин");
    }

    #[test]
    fn test_compose_digest_numbers_in_insertion_order() {
        let now = Utc::now();
        let items = vec![
            pending("T", "https://x/a", 15, now),
            pending("U", "https://x/b", 120, now),
        ];
        let text = compose_digest(&items, now);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "1. T   [S](https://x/a) • 15 мин");
        assert_eq!(lines[1], "2. U   [S](https://x/b) • 2 ч");
    }
}
