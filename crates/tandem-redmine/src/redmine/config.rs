use std::fmt;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Connection settings for one Redmine installation. `public_url` is only
/// used when composing backlinks that point at Redmine; it defaults to the
/// API base URL.
#[derive(Clone)]
pub struct RedmineConfig {
    pub base_url: String,
    pub api_key: String,
    pub public_url: String,
    pub page_size: u32,
}

impl RedmineConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = trim_base_url(base_url.into());
        Self {
            public_url: base_url.clone(),
            base_url,
            api_key: api_key.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_public_url(mut self, public_url: impl Into<String>) -> Self {
        self.public_url = trim_base_url(public_url.into());
        self
    }
}

fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_owned()
}

impl fmt::Debug for RedmineConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RedmineConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("public_url", &self.public_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_the_api_key() {
        let config = RedmineConfig::new("https://redmine.example.com/", "secret-key");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
        assert_eq!(config.base_url, "https://redmine.example.com");
    }
}
