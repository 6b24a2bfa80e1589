use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Feed parsing error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid date: {0} (use today, yesterday, week, month, YYYY-MM-DD or RFC 3339)")]
    InvalidDate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Ambiguous identifier prefix: {0}")]
    Ambiguous(String),

    #[error("Sync is not configured: {0}")]
    NotConfigured(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Relay transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A fetch or parse failure whose error bookkeeping also failed.
    #[error("{source} (additionally failed to record feed error: {record})")]
    FeedErrorNotRecorded {
        source: Box<DigestError>,
        record: Box<DigestError>,
    },
}

impl DigestError {
    /// Stable machine-readable code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DigestError::Storage(_) => "storage",
            DigestError::Fetch(_) => "fetch_error",
            DigestError::Parse(_) => "parse_error",
            DigestError::InvalidInput(_) => "invalid_input",
            DigestError::InvalidDate(_) => "invalid_date",
            DigestError::NotFound(_) => "not_found",
            DigestError::Duplicate(_) => "duplicate",
            DigestError::Ambiguous(_) => "ambiguous",
            DigestError::NotConfigured(_) => "not_configured",
            DigestError::Crypto(_) => "crypto",
            DigestError::Transport(_) => "transport",
            DigestError::Serialization(_) => "serialization",
            DigestError::Io(_) => "io",
            DigestError::Config(_) => "config",
            DigestError::FeedErrorNotRecorded { source, .. } => source.kind(),
        }
    }

    /// True for errors the caller caused, as opposed to failures of the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DigestError::InvalidInput(_)
                | DigestError::InvalidDate(_)
                | DigestError::NotFound(_)
                | DigestError::Duplicate(_)
                | DigestError::Ambiguous(_)
        )
    }
}

impl From<reqwest::Error> for DigestError {
    fn from(e: reqwest::Error) -> Self {
        DigestError::Fetch(e.to_string())
    }
}

impl From<serde_json::Error> for DigestError {
    fn from(e: serde_json::Error) -> Self {
        DigestError::Serialization(e.to_string())
    }
}

impl From<opml::Error> for DigestError {
    fn from(e: opml::Error) -> Self {
        DigestError::Serialization(e.to_string())
    }
}

impl From<crate::config::ConfigError> for DigestError {
    fn from(e: crate::config::ConfigError) -> Self {
        DigestError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DigestError>;
