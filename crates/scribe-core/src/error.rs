use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScribeError {
    // Stage errors
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("query '{query}' failed: {message}")]
    Research { query: String, message: String },

    #[error("Writing failed: {0}")]
    Writing(String),

    #[error("Editing failed: {0}")]
    Editing(String),

    #[error("SEO optimization failed: {0}")]
    Seo(String),

    // Generation worker errors
    #[error("Generation request failed: {0}")]
    Generation(String),

    #[error("Generation output parse error: {0}")]
    GenerationParse(String),

    #[error("Generation provider not supported: {0}")]
    UnsupportedProvider(String),

    // Similarity-search errors
    #[error("Retrieval failed: {collection}: {message}")]
    Retrieval { collection: String, message: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScribeError {
    pub fn retrieval(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Retrieval {
            collection: collection.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScribeError>;
