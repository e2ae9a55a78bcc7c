//! Attachment enumeration.

use tracing::debug;

use crate::config::Identity;
use crate::model::attachment::{AttachmentPayload, AttachmentRecord, UNNAMED_ATTACHMENT};
use crate::parser::mime::{is_cms_container, Disposition, MimePart, MimeTree, PartId};
use crate::render::calendar;

/// Calendar content types that get a preview.
const CALENDAR_TYPES: &[&str] = &["text/calendar", "text/x-vcalendar"];

/// Whether a leaf is listed as an attachment.
///
/// Anything with an `attachment` or `inline` disposition qualifies, and so
/// do calendar parts, except inline `text/plain` which is body text. A CMS
/// container that could not be opened is listed too, so undecryptable
/// content stays reachable.
pub fn is_attachment(part: &MimePart) -> bool {
    if !part.is_leaf() || part.body.is_none() {
        return false;
    }
    match part.disposition {
        Disposition::Inline if part.content_type == "text/plain" => false,
        Disposition::Attachment | Disposition::Inline => true,
        Disposition::None => {
            CALENDAR_TYPES.contains(&part.content_type.as_str()) || is_cms_container(part)
        }
    }
}

/// Attachment parts in projection order.
pub fn attachment_parts(tree: &MimeTree) -> Vec<PartId> {
    tree.walk()
        .filter(|(_, part)| is_attachment(part))
        .map(|(id, _)| id)
        .collect()
}

/// List the attachments of `tree`.
///
/// Calendar parts get a preview resolved against the viewer's identities
/// and the message's `forwarded_to` address. Payloads are only copied when
/// `include_content` is set.
pub fn extract(
    tree: &MimeTree,
    include_content: bool,
    identities: &[Identity],
    forwarded_to: Option<&str>,
) -> Vec<AttachmentRecord> {
    attachment_parts(tree)
        .into_iter()
        .map(|id| record(&tree[id], include_content, identities, forwarded_to))
        .collect()
}

fn record(
    part: &MimePart,
    include_content: bool,
    identities: &[Identity],
    forwarded_to: Option<&str>,
) -> AttachmentRecord {
    let body = part.body.as_ref();
    let size_bytes = body.map_or(0, |b| b.len() as u64);

    let preview = if CALENDAR_TYPES.contains(&part.content_type.as_str()) {
        body.and_then(|b| calendar::preview(&b.to_text(), identities, forwarded_to))
    } else {
        None
    };

    debug!(
        filename = ?part.filename,
        content_type = %part.content_type,
        size_bytes,
        "Attachment"
    );

    AttachmentRecord {
        filename: filename_of(part),
        content_type: part.content_type.clone(),
        size_bytes,
        content: include_content.then(|| body.map(|b| b.as_bytes().to_vec()).unwrap_or_default()),
        preview,
    }
}

/// The decoded payload of the `index`-th attachment.
pub fn payload(tree: &MimeTree, index: usize) -> Option<AttachmentPayload> {
    let id = *attachment_parts(tree).get(index)?;
    let part = &tree[id];
    Some(AttachmentPayload {
        filename: filename_of(part),
        content_type: part.content_type.clone(),
        bytes: part
            .body
            .as_ref()
            .map(|b| b.as_bytes().to_vec())
            .unwrap_or_default(),
    })
}

fn filename_of(part: &MimePart) -> String {
    part.filename
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(UNNAMED_ATTACHMENT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::mime::parse;

    const MIXED: &str = "From: a@example.com\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: inline\r\n\
\r\n\
Body text\r\n\
--b\r\n\
Content-Type: text/plain; name=\"notes.txt\"\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
\r\n\
héllo\r\n\
--b\r\n\
Content-Type: image/png\r\n\
Content-Disposition: inline\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--b\r\n\
Content-Type: text/calendar; method=REQUEST\r\n\
\r\n\
BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:Standup\r\n\
DTSTART:20240102T090000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n\
--b--\r\n";

    #[test]
    fn test_enumeration() {
        let tree = parse(MIXED.as_bytes()).unwrap();
        let list = extract(&tree, false, &[], None);
        let types: Vec<_> = list.iter().map(|a| a.content_type.as_str()).collect();
        assert_eq!(types, vec!["text/plain", "image/png", "text/calendar"]);

        assert_eq!(list[0].filename, "notes.txt");
        assert_eq!(list[0].size_bytes, "héllo".len() as u64);
        assert_eq!(list[1].filename, UNNAMED_ATTACHMENT);
        assert_eq!(list[1].size_bytes, 8);
        assert!(list.iter().all(|a| a.content.is_none()));

        let preview = list[2].preview.as_ref().unwrap();
        assert_eq!(preview.summary, "Standup");
        assert_eq!(preview.timezone.as_deref(), Some("UTC"));
    }

    #[test]
    fn test_include_content_and_payload() {
        let tree = parse(MIXED.as_bytes()).unwrap();
        let list = extract(&tree, true, &[], None);
        assert_eq!(list[1].content.as_deref(), Some(&b"\x89PNG\r\n\x1a\n"[..]));

        let png = payload(&tree, 1).unwrap();
        assert_eq!(png.content_type, "image/png");
        assert_eq!(png.bytes.len(), 8);
        assert!(payload(&tree, 3).is_none());
    }

    #[test]
    fn test_plain_message_has_no_attachments() {
        let tree = parse(b"From: a@example.com\r\nSubject: x\r\n\r\nhello\r\n").unwrap();
        assert!(extract(&tree, false, &[], None).is_empty());
    }

    #[test]
    fn test_named_part_without_disposition_is_not_listed() {
        let raw = "From: a@example.com\r\n\
Content-Type: multipart/related; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/html\r\n\
\r\n\
<img src=\"cid:logo\">\r\n\
--b\r\n\
Content-Type: image/png; name=\"logo.png\"\r\n\
Content-ID: <logo>\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--b--\r\n";
        let tree = parse(raw.as_bytes()).unwrap();
        assert!(extract(&tree, false, &[], None).is_empty());
    }

    #[test]
    fn test_unopened_cms_container_is_listed() {
        let raw = "From: a@example.com\r\n\
Content-Type: application/pkcs7-mime; smime-type=enveloped-data; name=\"smime.p7m\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
AAECAw==\r\n";
        let tree = parse(raw.as_bytes()).unwrap();
        let list = extract(&tree, false, &[], None);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].filename, "smime.p7m");
    }
}
