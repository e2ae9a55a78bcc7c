//! Message projection and body types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::attachment::AttachmentRecord;
use super::signature::SignatureVerdict;

/// Flattened, display-ready bodies of a message.
///
/// `html` is sanitizer-clean whenever present; `plain` is populated from the
/// HTML when the message has no usable plain-text part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BodyResult {
    pub plain: String,
    pub html: Option<String>,
}

/// The stable projection of one message, built once per request.
///
/// Header fields are RFC 2047 decoded with whitespace collapsed. Absent
/// address and subject headers project as empty strings, absent
/// identification headers as `null`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageProjection {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    /// The `Date:` header as written.
    pub date: String,
    /// `date` parsed to UTC, when it could be parsed.
    pub date_utc: Option<DateTime<Utc>>,
    pub subject: String,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub reply_to: Option<String>,
    pub forwarded_to: Option<String>,
    pub delivered_to: Option<String>,
    pub body: BodyResult,
    pub attachments: Vec<AttachmentRecord>,
    /// Tags from the mail index.
    pub tags: BTreeSet<String>,
    /// `None` when the message carries no signature.
    pub signature: Option<SignatureVerdict>,
}
