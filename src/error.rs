use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BugreportError>;

/// Errors surfaced by the parsers and the file loading harness.
///
/// Malformed bugreport content is never reported through this type: unknown
/// lines, unknown sections and missing markers are tolerated. Only contract
/// violations, date grammar defects and harness failures end up here.
#[derive(Debug, Error)]
pub enum BugreportError {
    // ------------------------------------------------------------------
    // Line cursor contract errors
    // ------------------------------------------------------------------
    #[error("line cursor out of range: position {pos} in a view of {len} lines")]
    OutOfRange { pos: usize, len: usize },

    #[error("invalid line range {start}..{end} for a view of {len} lines")]
    InvalidRange { start: usize, end: usize, len: usize },

    // ------------------------------------------------------------------
    // Date grammar errors
    // ------------------------------------------------------------------
    #[error("invalid date '{text}': {reason}")]
    DateParse { text: String, reason: String },

    #[error("pattern group '{group}' did not participate in the match")]
    MissingGroup { group: String },

    // ------------------------------------------------------------------
    // Configuration and harness errors
    // ------------------------------------------------------------------
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0}")]
    Archive(String),
}
