use crate::config::{EDIT_URL_PATTERN, VIEW_URL_PATTERN};
use crate::text::url_encode;

/// Resolves the URLs the translator links pages to.
pub trait UrlBuilder: Send + Sync {
    fn view_url(&self, page: &str) -> String;
    fn edit_url(&self, page: &str) -> String;
    fn attachment_url(&self, path: &str) -> String;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultUrlBuilder {
    base_url: String,
}

impl DefaultUrlBuilder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
        }
    }

    fn expand(&self, pattern: &str, page: &str) -> String {
        format!("{}{}", self.base_url, pattern.replace("%s", &url_encode(page)))
    }
}

impl UrlBuilder for DefaultUrlBuilder {
    fn view_url(&self, page: &str) -> String {
        self.expand(VIEW_URL_PATTERN, page)
    }

    fn edit_url(&self, page: &str) -> String {
        self.expand(EDIT_URL_PATTERN, page)
    }

    fn attachment_url(&self, path: &str) -> String {
        let encoded: Vec<String> = path.split('/').map(url_encode).collect();
        format!("{}attach/{}", self.base_url, encoded.join("/"))
    }
}
