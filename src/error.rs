//! Centralized error types for mailview.
//!
//! Only [`MailError`] ever reaches a caller of the rendering pipeline. The
//! other enums describe recoverable failures: each is logged and degraded
//! where it happens (opaque leaf, skipped filter, missing preview, `Invalid`
//! verdict) so one bad part never prevents the rest of a message from
//! rendering.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a request.
#[derive(Error, Debug)]
pub enum MailError {
    /// The root MIME envelope could not be decoded at all.
    #[error("Malformed message: {0}")]
    StructuralParse(String),

    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The message exceeds the configured size limit.
    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    /// The message identifier is unknown to the mail index.
    #[error("Message not found: {0}")]
    NotFound(String),

    /// The requested attachment index is out of range.
    #[error("Message '{message_id}' has no attachment #{index}")]
    AttachmentIndex { message_id: String, index: usize },

    /// A configured file (CA bundle, key, ...) could not be used.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, MailError>`.
pub type Result<T> = std::result::Result<T, MailError>;

impl MailError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A single MIME part could not be decoded; it becomes an opaque leaf.
#[derive(Error, Debug)]
pub enum PartDecodeError {
    #[error("CMS structure error: {0}")]
    Cms(#[from] CmsError),

    #[error("No decryption identity matches the enveloped content")]
    NoDecryptionKey,

    #[error("Decryption failed: {0}")]
    Decrypt(openssl::error::ErrorStack),

    #[error("Decompression failed: {0}")]
    Inflate(std::io::Error),

    #[error("Nested content exceeds depth limit {0}")]
    TooDeep(usize),

    #[error("Encapsulated message could not be parsed")]
    Unparseable,
}

/// Malformed DER/BER or unexpected CMS layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CmsError {
    #[error("Truncated input at offset {0}")]
    Truncated(usize),

    #[error("Expected tag 0x{expected:02x}, found 0x{found:02x}")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("Unsupported length encoding")]
    BadLength,

    #[error("Unsupported content type {0}")]
    UnsupportedContentType(String),

    #[error("{0}")]
    Malformed(&'static str),
}

/// A configured content filter could not be compiled.
#[derive(Error, Debug)]
#[error("Invalid content filter /{pattern}/ for {content_type}: {source}")]
pub struct FilterError {
    pub content_type: String,
    pub pattern: String,
    pub source: regex::Error,
}

/// An iCalendar payload could not be turned into a preview.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("No VCALENDAR object found")]
    NotACalendar,

    #[error("No VEVENT component found")]
    NoEvent,

    #[error("Component {0} is never closed")]
    Unterminated(String),

    #[error("Unexpected END:{0}")]
    UnbalancedEnd(String),

    #[error("Missing required property {0}")]
    MissingProperty(&'static str),

    #[error("Invalid date-time value '{0}'")]
    BadDateTime(String),

    #[error("Invalid recurrence rule '{0}'")]
    BadRecurrence(String),
}

/// Anything that stops a signature from being checked. Always resolves to
/// an `Invalid` verdict.
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Malformed signature: {0}")]
    Cms(#[from] CmsError),

    #[error("Unsupported digest algorithm {0}")]
    UnsupportedDigest(String),

    #[error("Unsupported signature algorithm {0}")]
    UnsupportedSignature(String),

    #[error("Signing certificate not found in signature")]
    SignerNotFound,

    #[error("Signed message is missing its signature part")]
    MissingSignature,

    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    #[error(transparent)]
    Pgp(#[from] PgpError),
}

/// Failure of the external OpenPGP tool.
#[derive(Error, Debug)]
pub enum PgpError {
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("'{0}' timed out")]
    Timeout(String),

    #[error("'{program}' exited with status {status}")]
    Failed { program: String, status: i32 },

    #[error("I/O error talking to the OpenPGP tool: {0}")]
    Io(#[from] std::io::Error),
}
