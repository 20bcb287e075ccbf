use thiserror::Error;
use uuid::Uuid;

/// Coarse classification of an [`AppError`].
///
/// The pipeline decides how far a failure propagates from its kind:
/// transport and schema-drift problems degrade a single resource or object,
/// input-integrity problems fail the object, local I/O problems drop one
/// attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unreachable endpoint or non-2xx response.
    Transport,
    /// Upstream payload no longer has the expected shape.
    SchemaDrift,
    /// Harvest object missing or without content.
    InputIntegrity,
    /// Scratch file missing or unreadable.
    LocalIo,
    /// The dataset catalog rejected a write.
    Catalog,
    /// The harvest object ledger failed.
    Ledger,
    /// Bad or missing configuration.
    Config,
    /// Anything else.
    Internal,
}

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while harvesting.
/// It uses the `thiserror` crate for ergonomic error handling and automatic
/// conversion from underlying library errors.
///
/// # Error Conversion
///
/// Most errors automatically convert from their source types using the `#[from]` attribute:
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
/// - `std::io::Error` → `AppError::Io`
/// - `csv::Error` → `AppError::CsvError`
///
/// # Examples
///
/// ```no_run
/// use statweb_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Wraps every error coming from the SQLx-backed ledger, including
    /// connection failures and constraint violations.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The HTTP client could not be built or the request could not be sent.
    #[error("HTTP client error: {0}")]
    ClientError(String),

    /// Remote endpoint answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Network or connection error.
    ///
    /// DNS failures, refused connections, resets.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// JSON serialization or deserialization failed.
    ///
    /// Raised when an endpoint returns something that is not JSON, or when a
    /// harvest object payload cannot be decoded.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Local filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tabular conversion failed while reading or writing CSV records.
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Endpoint answered 2xx with an empty body.
    #[error("Empty response body")]
    EmptyResponse,

    /// Index endpoint answered with JSON that holds no list of indicators.
    #[error("Malformed index at {0}")]
    MalformedIndex(String),

    /// Harvest object not found in the ledger.
    #[error("Harvest object not found: {0}")]
    ObjectNotFound(String),

    /// Harvest object exists but carries no payload.
    #[error("Empty content for object {0}")]
    EmptyContent(Uuid),

    /// Upstream metadata is missing a field or has an unexpected format.
    #[error("Metadata error: {0}")]
    MetadataError(String),

    /// The dataset catalog refused an operation.
    ///
    /// Covers `success: false` answers from the CKAN action API as well as
    /// failed file store uploads.
    #[error("Catalog error: {0}")]
    CatalogError(String),

    /// Configuration file error.
    ///
    /// This error occurs when reading or parsing the configuration file fails,
    /// such as when harvest.toml is malformed or contains invalid values.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Anything without a dedicated variant, such as an unknown state name
    /// read back from the ledger.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns the taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ClientError(_)
            | AppError::HttpStatus { .. }
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::EmptyResponse => ErrorKind::Transport,
            AppError::SerializationError(_)
            | AppError::MalformedIndex(_)
            | AppError::MetadataError(_) => ErrorKind::SchemaDrift,
            AppError::ObjectNotFound(_) | AppError::EmptyContent(_) => ErrorKind::InputIntegrity,
            AppError::Io(_) | AppError::CsvError(_) => ErrorKind::LocalIo,
            AppError::CatalogError(_) => ErrorKind::Catalog,
            AppError::DatabaseError(_) => ErrorKind::Ledger,
            AppError::ConfigError(_) | AppError::InvalidUrl(_) => ErrorKind::Config,
            AppError::Generic(_) => ErrorKind::Internal,
        }
    }

    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot reach the harvest ledger.\n   Check DATABASE_URL and that PostgreSQL is up.".to_string()
                } else {
                    format!("Ledger error: {}", e)
                }
            }
            AppError::ClientError(msg) => {
                if msg.contains("timeout") || msg.contains("timed out") {
                    "Request timed out. The statistics site may be slow or unreachable.\n   Try again later.".to_string()
                } else if msg.contains("connect") {
                    format!(
                        "Cannot connect: {}\n   Check your internet connection and the index URL.",
                        msg
                    )
                } else {
                    format!("API error: {}", msg)
                }
            }
            AppError::HttpStatus { status, url } => {
                format!("{} answered HTTP {}.\n   The endpoint may have moved.", url, status)
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!(
                    "Request timed out after {} seconds.\n   The server may be overloaded. Try again later.",
                    secs
                )
            }
            AppError::MalformedIndex(url) => {
                format!(
                    "The index at {} is not in the expected format.\n   Check the source URL in harvest.toml.",
                    url
                )
            }
            AppError::CatalogError(msg) => {
                format!(
                    "Catalog error: {}\n   Check CKAN_URL and CKAN_API_KEY.",
                    msg
                )
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your configuration file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if re-running the failed object could succeed.
    ///
    /// The pipeline never retries on its own; this is a hint for whoever
    /// schedules the stages.
    ///
    /// # Examples
    ///
    /// ```
    /// use statweb_core::error::AppError;
    ///
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::HttpStatus { status: 503, url: "http://x".to_string() };
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::ObjectNotFound("missing".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::ClientError(_) => true,
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
