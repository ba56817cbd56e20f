//! Template registry error types.

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template override at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template override at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, TemplateError>;
