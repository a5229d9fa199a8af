use std::env;
use std::time::Duration;

use relatos_shared::Categories;
use tracing::warn;

use crate::persistence::DEFAULT_FILTERS_KEY;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
/// Ceiling for the doubling delay between change stream reconnects.
pub const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Upper bound for every gateway call made by the store.
    pub request_timeout: Duration,
    /// First wait before resubscribing to ended change streams.
    pub resubscribe_delay: Duration,
    /// Key of the persisted filter slot.
    pub storage_key: String,
    /// Labels offered for filtering and posting.
    pub categories: Categories,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
            storage_key: DEFAULT_FILTERS_KEY.to_string(),
            categories: Categories::default(),
        }
    }
}

impl FeedConfig {
    /// Reads `RELATOS_TIMEOUT_SECS` and `RELATOS_CATEGORIES`; anything
    /// missing or unparsable keeps its default, and invalid values are logged.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = env::var("RELATOS_TIMEOUT_SECS") {
            match parse_timeout_secs(&raw) {
                Some(timeout) => config.request_timeout = timeout,
                None => warn!(value = %raw, "ignoring invalid RELATOS_TIMEOUT_SECS"),
            }
        }
        if let Ok(raw) = env::var("RELATOS_CATEGORIES") {
            let categories = Categories::parse_list(&raw);
            if !categories.labels().is_empty() {
                config.categories = categories;
            }
        }
        config
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }
}

fn parse_timeout_secs(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
