/// Errors surfaced by the wiki core
#[derive(Debug, thiserror::Error)]
pub enum WikiError {
    #[error("Illegal page name: {0:?}")]
    InvalidName(String),

    #[error("Page already exists: {0}")]
    PageExists(String),

    #[error("No such page: {0}")]
    PageNotFound(String),

    #[error("Page provider failed while {context}: {source}")]
    Provider {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Circular inclusion of page {0}")]
    CircularInclusion(String),

    #[error("Plugin {name} failed: {message}")]
    Plugin { name: String, message: String },
}

impl WikiError {
    pub fn provider(context: impl Into<String>, source: std::io::Error) -> Self {
        WikiError::Provider {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, WikiError>;
