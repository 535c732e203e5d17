use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,

    // Pipeline cadences
    pub poll_interval_secs: u64,
    pub scrape_interval_mins: u64,
    pub flush_interval_mins: u64,

    // Scraper bounds
    pub scrape_batch_size: i64,
    pub scrape_concurrency: usize,

    // Postgres
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_pool_size: u32,

    // NATS
    pub nats_url: String,
    pub nats_items_subject: String,
    pub nats_notifications_subject: String,

    // Redis content cache (optional — scraping degrades to origin fetch without it)
    pub redis_url: Option<String>,

    pub log_level: String,

    /// Fall back to the in-process direct path when the bus is unreachable at startup.
    pub degrade_without_bus: bool,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            telegram_bot_token: required_env("TELEGRAM_BOT_TOKEN"),
            poll_interval_secs: parsed_env("POLL_INTERVAL_SECS", 60),
            scrape_interval_mins: parsed_env("SCRAPE_INTERVAL_MINS", 1),
            flush_interval_mins: parsed_env("FLUSH_INTERVAL_MINS", 15),
            scrape_batch_size: parsed_env("SCRAPE_BATCH_SIZE", 50),
            scrape_concurrency: parsed_env("SCRAPE_CONCURRENCY", 3),
            db_host: required_env("DB_HOST"),
            db_port: parsed_env("DB_PORT", 5432),
            db_user: required_env("DB_USER"),
            db_password: required_env("DB_PASSWORD"),
            db_name: required_env("DB_NAME"),
            db_pool_size: parsed_env("DB_POOL_SIZE", 10),
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            nats_items_subject: env::var("NATS_ITEMS_SUBJECT")
                .unwrap_or_else(|_| "news.items".to_string()),
            nats_notifications_subject: env::var("NATS_NOTIFICATIONS_SUBJECT")
                .unwrap_or_else(|_| "news.notifications".to_string()),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            degrade_without_bus: env::var("DEGRADE_WITHOUT_BUS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }

    /// Postgres connection string assembled from the DSN parts.
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }

    /// Log configuration without leaking secrets.
    pub fn log_redacted(&self) {
        tracing::info!(
            db_host = %self.db_host,
            db_name = %self.db_name,
            db_pool_size = self.db_pool_size,
            nats_url = %self.nats_url,
            redis = self.redis_url.is_some(),
            poll_interval_secs = self.poll_interval_secs,
            scrape_interval_mins = self.scrape_interval_mins,
            flush_interval_mins = self.flush_interval_mins,
            "Configuration loaded (token: {} chars)",
            self.telegram_bot_token.len()
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
