use thiserror::Error;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, DboeError>;

/// Enum representing all possible errors in the dboe_backend library.
#[derive(Error, Debug)]
pub enum DboeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("XML parsing error: {0}")]
    XmlParse(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Data directory not found or could not be determined")]
    DataDirNotFound,

    #[error("Invalid XML: {0}")]
    Xml(String),

    #[error("Failed to parse data: {0}")]
    ParseError(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Method \"{0}\" not allowed.")]
    MethodNotAllowed(String),

    #[error("Search index is not configured")]
    SearchNotConfigured,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DboeError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        DboeError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
