//! The two read operations exposed to callers: fetch a message projection
//! and fetch one attachment's bytes.

use tracing::{info_span, warn};

use crate::error::{MailError, Result};
use crate::model::attachment::AttachmentPayload;
use crate::model::mail::MessageProjection;
use crate::render::projection::Renderer;
use crate::store::MailIndex;

/// Project a stored message.
///
/// A failure to read tags is logged and rendered as an empty tag set; only
/// a missing or undecodable message fails the request.
pub fn fetch_message(
    index: &dyn MailIndex,
    renderer: &Renderer,
    message_id: &str,
    include_content: bool,
) -> Result<MessageProjection> {
    let _span = info_span!("fetch_message", message_id).entered();

    let raw = index.get_raw_bytes(message_id)?;
    let tags = index.get_tags(message_id).unwrap_or_else(|e| {
        warn!(error = %e, "Could not read tags");
        Default::default()
    });
    renderer.render(&raw, tags, include_content)
}

/// The `index`-th attachment of a stored message, in the order the
/// projection lists them.
pub fn fetch_attachment(
    store: &dyn MailIndex,
    renderer: &Renderer,
    message_id: &str,
    index: usize,
) -> Result<AttachmentPayload> {
    let _span = info_span!("fetch_attachment", message_id, index).entered();

    let raw = store.get_raw_bytes(message_id)?;
    renderer
        .attachment(&raw, index)?
        .ok_or_else(|| MailError::AttachmentIndex {
            message_id: message_id.to_string(),
            index,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};

    /// In-memory index; tag lookups fail for ids listed in `broken_tags`.
    #[derive(Default)]
    struct MemoryIndex {
        messages: HashMap<String, Vec<u8>>,
        broken_tags: Vec<String>,
    }

    impl MailIndex for MemoryIndex {
        fn get_raw_bytes(&self, message_id: &str) -> Result<Vec<u8>> {
            self.messages
                .get(message_id)
                .cloned()
                .ok_or_else(|| MailError::NotFound(message_id.into()))
        }

        fn get_tags(&self, message_id: &str) -> Result<BTreeSet<String>> {
            if self.broken_tags.iter().any(|id| id == message_id) {
                return Err(MailError::NotFound(message_id.into()));
            }
            Ok(BTreeSet::from(["inbox".to_string()]))
        }
    }

    const WITH_ATTACHMENT: &[u8] = b"From: a@example.com\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello\r\n\
--b\r\n\
Content-Type: application/octet-stream; name=\"data.bin\"\r\n\
Content-Disposition: attachment; filename=\"data.bin\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
AAECAw==\r\n\
--b--\r\n";

    fn index() -> MemoryIndex {
        let mut index = MemoryIndex::default();
        index.messages.insert("m1".into(), WITH_ATTACHMENT.to_vec());
        index.messages.insert("m2".into(), WITH_ATTACHMENT.to_vec());
        index.broken_tags.push("m2".into());
        index
    }

    #[test]
    fn test_fetch_message() {
        let renderer = Renderer::default();
        let p = fetch_message(&index(), &renderer, "m1", false).unwrap();
        assert_eq!(p.tags, BTreeSet::from(["inbox".to_string()]));
        assert_eq!(p.attachments.len(), 1);
        assert!(p.attachments[0].content.is_none());

        let p = fetch_message(&index(), &renderer, "m2", true).unwrap();
        assert!(p.tags.is_empty());
        assert_eq!(p.attachments[0].content.as_deref(), Some(&[0u8, 1, 2, 3][..]));
    }

    #[test]
    fn test_fetch_attachment() {
        let renderer = Renderer::default();
        let payload = fetch_attachment(&index(), &renderer, "m1", 0).unwrap();
        assert_eq!(payload.filename, "data.bin");
        assert_eq!(payload.content_type, "application/octet-stream");
        assert_eq!(payload.bytes, vec![0, 1, 2, 3]);

        assert!(matches!(
            fetch_attachment(&index(), &renderer, "m1", 1),
            Err(MailError::AttachmentIndex { index: 1, .. })
        ));
        assert!(matches!(
            fetch_message(&index(), &renderer, "nope", false),
            Err(MailError::NotFound(_))
        ));
    }
}
