use std::fmt;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Connection settings for one GitLab installation plus the category-key
/// vocabulary used to fold labels. `public_url` is only used when composing
/// backlinks that point at GitLab; it defaults to the API base URL.
#[derive(Clone)]
pub struct GitlabConfig {
    pub base_url: String,
    pub token: String,
    pub public_url: String,
    pub category_keys: Vec<String>,
    pub page_size: u32,
}

impl GitlabConfig {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        category_keys: Vec<String>,
    ) -> Self {
        let base_url = trim_base_url(base_url.into());
        Self {
            public_url: base_url.clone(),
            base_url,
            token: token.into(),
            category_keys,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_public_url(mut self, public_url: impl Into<String>) -> Self {
        self.public_url = trim_base_url(public_url.into());
        self
    }

    pub(crate) fn is_category_label(&self, label: &str) -> bool {
        self.category_keys
            .iter()
            .any(|key| key.eq_ignore_ascii_case(label.trim()))
    }
}

fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_owned()
}

impl fmt::Debug for GitlabConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("GitlabConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("public_url", &self.public_url)
            .field("category_keys", &self.category_keys)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_the_token() {
        let config = GitlabConfig::new(
            "https://gitlab.example.com/",
            "glpat-secret",
            vec!["Bug".to_owned()],
        );
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("glpat-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn category_labels_match_case_insensitively() {
        let config = GitlabConfig::new("https://g", "t", vec!["Bug".to_owned()]);
        assert!(config.is_category_label("bug"));
        assert!(config.is_category_label(" BUG "));
        assert!(!config.is_category_label("feature"));
    }
}
