//! Attachment records.
//!
//! The decoded payload is only carried when the caller asks for it; the
//! default projection lists attachments by metadata alone.

use serde::{Serialize, Serializer};

use super::calendar::CalendarPreview;

/// Filename used when a part does not declare one.
pub const UNNAMED_ATTACHMENT: &str = "unnamed attachment";

/// One attachment of a message, in MIME part order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentRecord {
    /// Declared filename, or [`UNNAMED_ATTACHMENT`].
    pub filename: String,

    /// MIME content type (e.g. `"image/jpeg"`, `"text/calendar"`).
    pub content_type: String,

    /// Decoded size in bytes (UTF-8 length for text parts).
    pub size_bytes: u64,

    /// Decoded payload, present only when explicitly requested.
    #[serde(serialize_with = "serialize_content")]
    pub content: Option<Vec<u8>>,

    /// Human-readable summary of a calendar invitation.
    pub preview: Option<CalendarPreview>,
}

/// The payload of a single attachment, as returned by "fetch attachment".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPayload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Binary content travels as standard base64 in the JSON projection.
fn serialize_content<S: Serializer>(
    content: &Option<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use base64::Engine;

    match content {
        Some(bytes) => {
            serializer.serialize_some(&base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        None => serializer.serialize_none(),
    }
}
