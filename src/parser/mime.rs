//! MIME walking: decodes a raw message into an arena of parts.
//!
//! `mail-parser` does the wire-level work (boundaries, transfer encodings,
//! charsets). The walker turns its output into a [`MimeTree`] and opens
//! `application/pkcs7-mime` containers (signed, enveloped or compressed CMS),
//! grafting the encapsulated message underneath the container part as a
//! synthesized subtree. Downstream components only ever see the tree.

use std::io::Read;

use mail_parser::{MessageParser, MimeHeaders, PartType};
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::{debug, warn};

use crate::error::{CmsError, MailError, PartDecodeError, Result};
use crate::parser::cms::{self, ContentInfo};
use crate::parser::header::{parse_parameters, Headers};

/// Default maximum depth of nested CMS containers (adversarial input guard).
pub const MAX_DEPTH: usize = 10;

/// Index of a part inside its [`MimeTree`].
pub type PartId = usize;

/// `Content-Disposition` of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
    None,
}

/// Transfer-decoded content of a leaf part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartBody {
    /// Text already converted from its declared charset.
    Text(String),
    Binary(Vec<u8>),
}

impl PartBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Text content; binary content is decoded as lossy UTF-8.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One node of the decoded tree.
#[derive(Debug, Clone)]
pub struct MimePart {
    /// Lowercase `type/subtype`.
    pub content_type: String,
    /// `Content-Type` parameters, names lowercased.
    pub params: Vec<(String, String)>,
    pub disposition: Disposition,
    pub filename: Option<String>,
    pub headers: Headers,
    /// Leaf content; `None` for multiparts. CMS containers keep their
    /// encoded blob here even after children were synthesized from it.
    pub body: Option<PartBody>,
    pub children: Vec<PartId>,
    pub parent: Option<PartId>,
    /// `true` for parts decoded out of a CMS container rather than found
    /// in the wire bytes.
    pub synthesized: bool,
    /// Undecoded body bytes, retained for `multipart/signed` so the signed
    /// octets can be recovered exactly.
    pub raw_body: Option<Vec<u8>>,
}

impl MimePart {
    /// Value of a `Content-Type` parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type.starts_with("multipart/")
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Arena of parts; the root is always at index 0.
#[derive(Debug, Clone)]
pub struct MimeTree {
    parts: Vec<MimePart>,
}

impl MimeTree {
    pub fn root(&self) -> &MimePart {
        &self.parts[0]
    }

    pub fn get(&self, id: PartId) -> Option<&MimePart> {
        self.parts.get(id)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Every part reachable from the root, in traversal order.
    pub fn walk(&self) -> Walk<'_> {
        self.walk_from(0)
    }

    /// Traversal starting at `id`.
    ///
    /// Wire parts are visited depth-first in document order. Subtrees decoded
    /// out of CMS containers are deferred until every wire part has been
    /// visited, so their content always follows the content of the message
    /// that carried them.
    pub fn walk_from(&self, id: PartId) -> Walk<'_> {
        Walk {
            tree: self,
            stack: vec![id],
            deferred: std::collections::VecDeque::new(),
        }
    }
}

impl std::ops::Index<PartId> for MimeTree {
    type Output = MimePart;

    fn index(&self, id: PartId) -> &MimePart {
        &self.parts[id]
    }
}

/// Iterator returned by [`MimeTree::walk`].
pub struct Walk<'a> {
    tree: &'a MimeTree,
    stack: Vec<PartId>,
    deferred: std::collections::VecDeque<PartId>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (PartId, &'a MimePart);

    fn next(&mut self) -> Option<Self::Item> {
        let id = match self.stack.pop() {
            Some(id) => id,
            None => self.deferred.pop_front()?,
        };
        let part = &self.tree.parts[id];
        if part.body.is_some() {
            // CMS container: its decoded content waits for the wire parts
            self.deferred.extend(part.children.iter().copied());
        } else {
            self.stack.extend(part.children.iter().rev().copied());
        }
        Some((id, part))
    }
}

/// A certificate and private key able to open enveloped CMS content.
#[derive(Clone)]
pub struct DecryptionKey {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl std::fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionKey")
            .field("subject", &self.cert.subject_name())
            .finish_non_exhaustive()
    }
}

/// Decodes raw messages into [`MimeTree`]s.
#[derive(Debug, Clone)]
pub struct MimeWalker {
    keys: Vec<DecryptionKey>,
    max_depth: usize,
}

impl Default for MimeWalker {
    fn default() -> Self {
        Self::new(Vec::new(), MAX_DEPTH)
    }
}

/// Parse a raw message with no decryption keys and default limits.
pub fn parse(raw: &[u8]) -> Result<MimeTree> {
    MimeWalker::default().parse(raw)
}

impl MimeWalker {
    pub fn new(keys: Vec<DecryptionKey>, max_depth: usize) -> Self {
        Self { keys, max_depth }
    }

    /// Decode a complete raw message.
    ///
    /// Only a root that cannot be read as a message at all is an error;
    /// problems inside individual parts degrade those parts to opaque leaves.
    pub fn parse(&self, raw: &[u8]) -> Result<MimeTree> {
        let raw = skip_from_line(raw);
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(MailError::StructuralParse("empty message".into()));
        }

        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| MailError::StructuralParse("no MIME structure found".into()))?;
        if message.parts.is_empty() {
            return Err(MailError::StructuralParse("no MIME structure found".into()));
        }

        let mut tree = MimeTree { parts: Vec::new() };
        self.graft(&mut tree, &message, raw, None, 0);

        if tree.root().headers.is_empty() {
            return Err(MailError::StructuralParse("missing header block".into()));
        }
        Ok(tree)
    }

    /// Append the parts of `message` to `tree` under `parent`.
    fn graft(
        &self,
        tree: &mut MimeTree,
        message: &mail_parser::Message<'_>,
        raw: &[u8],
        parent: Option<PartId>,
        depth: usize,
    ) -> PartId {
        self.add_part(tree, message, 0, raw, parent, depth, parent.is_some())
    }

    #[allow(clippy::too_many_arguments)]
    fn add_part(
        &self,
        tree: &mut MimeTree,
        message: &mail_parser::Message<'_>,
        index: usize,
        raw: &[u8],
        parent: Option<PartId>,
        depth: usize,
        synthesized: bool,
    ) -> PartId {
        let part = &message.parts[index];
        let header_start = part.raw_header_offset() as usize;
        let body_start = part.raw_body_offset() as usize;
        let body_end = part.raw_end_offset() as usize;

        let headers = Headers::parse(raw.get(header_start..body_start).unwrap_or_default());
        let (mut content_type, params) = headers
            .get("Content-Type")
            .map(parse_parameters)
            .unwrap_or_default();
        if !content_type.contains('/') {
            content_type = "text/plain".to_string();
        }
        let disposition = match headers.get("Content-Disposition").map(parse_parameters) {
            Some((d, _)) if d == "attachment" => Disposition::Attachment,
            Some((d, _)) if d == "inline" => Disposition::Inline,
            _ => Disposition::None,
        };
        let filename = part.attachment_name().map(str::to_string);

        if part.is_encoding_problem {
            warn!(
                content_type = %content_type,
                "Part has a transfer-encoding problem, keeping best-effort content"
            );
        }

        let id = tree.parts.len();
        tree.parts.push(MimePart {
            content_type,
            params,
            disposition,
            filename,
            headers,
            body: None,
            children: Vec::new(),
            parent,
            synthesized,
            raw_body: None,
        });

        match &part.body {
            PartType::Multipart(ids) if !ids.is_empty() => {
                if !tree.parts[id].is_multipart() {
                    tree.parts[id].content_type = "multipart/mixed".to_string();
                }
                if tree.parts[id].content_type == "multipart/signed" {
                    tree.parts[id].raw_body =
                        Some(raw.get(body_start..body_end).unwrap_or_default().to_vec());
                }
                for &child in ids {
                    let child = self.add_part(
                        tree,
                        message,
                        child as usize,
                        raw,
                        Some(id),
                        depth,
                        synthesized,
                    );
                    tree.parts[id].children.push(child);
                }
            }
            PartType::Multipart(_) => {
                // Declared multipart without usable boundaries: keep the raw body
                debug!("Multipart without parts, degrading to text leaf");
                let node = &mut tree.parts[id];
                node.content_type = "text/plain".to_string();
                node.params.clear();
                node.body = Some(PartBody::Text(
                    String::from_utf8_lossy(raw.get(body_start..body_end).unwrap_or_default())
                        .into_owned(),
                ));
            }
            PartType::Text(text) | PartType::Html(text) => {
                tree.parts[id].body = Some(PartBody::Text(text.to_string()));
            }
            PartType::Binary(_) | PartType::InlineBinary(_) | PartType::Message(_) => {
                tree.parts[id].body = Some(PartBody::Binary(part.contents().to_vec()));
                if is_cms_container(&tree.parts[id]) {
                    self.open_container(tree, id, depth);
                }
            }
        }

        id
    }

    /// Decode a CMS container and graft the encapsulated message under it.
    fn open_container(&self, tree: &mut MimeTree, id: PartId, depth: usize) {
        let blob = match &tree.parts[id].body {
            Some(body) => body.as_bytes().to_vec(),
            None => return,
        };

        let inner = match self.unwrap_cms(&blob, depth) {
            Ok(inner) => inner,
            Err(e) => {
                warn!(error = %e, "Could not open CMS content, keeping it as an opaque part");
                return;
            }
        };

        match MessageParser::default().parse(&inner[..]) {
            Some(message) if !message.parts.is_empty() => {
                let child = self.graft(tree, &message, &inner, Some(id), depth + 1);
                tree.parts[id].children.push(child);
            }
            _ => warn!(error = %PartDecodeError::Unparseable, "Discarding CMS content"),
        }
    }

    /// Recover the MIME entity encapsulated in a CMS blob.
    fn unwrap_cms(&self, blob: &[u8], depth: usize) -> std::result::Result<Vec<u8>, PartDecodeError> {
        if depth >= self.max_depth {
            return Err(PartDecodeError::TooDeep(self.max_depth));
        }

        match cms::parse_content_info(blob)? {
            ContentInfo::Signed(signed) => signed
                .content
                .ok_or(PartDecodeError::Cms(CmsError::Malformed("detached signature in pkcs7-mime"))),
            ContentInfo::Enveloped => self.decrypt(blob),
            ContentInfo::Compressed(compressed) => {
                if compressed.algorithm.oid != cms::oid::ZLIB {
                    return Err(CmsError::UnsupportedContentType(compressed.algorithm.oid).into());
                }
                let mut out = Vec::new();
                flate2::read::ZlibDecoder::new(&compressed.content[..])
                    .read_to_end(&mut out)
                    .map_err(PartDecodeError::Inflate)?;
                Ok(out)
            }
            ContentInfo::Other(oid) => Err(CmsError::UnsupportedContentType(oid).into()),
        }
    }

    fn decrypt(&self, blob: &[u8]) -> std::result::Result<Vec<u8>, PartDecodeError> {
        let pkcs7 = Pkcs7::from_der(blob).map_err(PartDecodeError::Decrypt)?;
        let mut last_error = PartDecodeError::NoDecryptionKey;
        for key in &self.keys {
            match pkcs7.decrypt(&key.key, &key.cert, Pkcs7Flags::empty()) {
                Ok(plain) => return Ok(plain),
                Err(e) => last_error = PartDecodeError::Decrypt(e),
            }
        }
        Err(last_error)
    }
}

/// `application/pkcs7-mime` (or a `.p7m` attachment declared as octet-stream).
pub fn is_cms_container(part: &MimePart) -> bool {
    match part.content_type.as_str() {
        "application/pkcs7-mime" | "application/x-pkcs7-mime" => true,
        "application/octet-stream" => part
            .filename
            .as_deref()
            .is_some_and(|f| f.to_ascii_lowercase().ends_with(".p7m")),
        _ => false,
    }
}

/// Skip an mbox `From ` separator line (and a UTF-8 BOM) at the start.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = "From: a@example.com\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
plain body\r\n\
--inner\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>html body</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"doc.pdf\"\r\n\
Content-Disposition: attachment; filename=\"doc.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQ=\r\n\
--outer--\r\n";

    #[test]
    fn test_skip_from_line() {
        let data = b"From user@example.com Thu Jan 01 00:00:00 2024\nSubject: Test\n\nBody\n";
        assert!(skip_from_line(data).starts_with(b"Subject:"));
        let data = b"Subject: Test\n\nBody\n";
        assert_eq!(skip_from_line(data), data);
    }

    #[test]
    fn test_tree_shape_and_order() {
        let tree = parse(NESTED.as_bytes()).unwrap();
        let types: Vec<_> = tree.walk().map(|(_, p)| p.content_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "multipart/mixed",
                "multipart/alternative",
                "text/plain",
                "text/html",
                "application/pdf"
            ]
        );
        let root = tree.root();
        assert!(root.body.is_none());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.param("boundary"), Some("outer"));

        let (_, pdf) = tree.walk().last().unwrap();
        assert_eq!(pdf.disposition, Disposition::Attachment);
        assert_eq!(pdf.filename.as_deref(), Some("doc.pdf"));
        assert_eq!(pdf.body.as_ref().unwrap().as_bytes(), b"%PDF-1.4");
        assert!(pdf.is_leaf());
    }

    #[test]
    fn test_parent_links() {
        let tree = parse(NESTED.as_bytes()).unwrap();
        for (id, part) in tree.walk() {
            for &child in &part.children {
                assert_eq!(tree[child].parent, Some(id));
            }
        }
        assert_eq!(tree.root().parent, None);
    }

    #[test]
    fn test_single_part_without_content_type() {
        let tree = parse(b"Subject: hi\r\n\r\nJust text\r\n").unwrap();
        assert_eq!(tree.len(), 1);
        let root = tree.root();
        assert_eq!(root.content_type, "text/plain");
        assert!(root.body.as_ref().unwrap().to_text().contains("Just text"));
    }

    #[test]
    fn test_empty_message_is_structural_error() {
        assert!(matches!(parse(b""), Err(MailError::StructuralParse(_))));
        assert!(matches!(parse(b"\r\n\r\n"), Err(MailError::StructuralParse(_))));
    }

    #[test]
    fn test_garbage_cms_stays_opaque() {
        let msg = "From: a@example.com\r\n\
Content-Type: application/pkcs7-mime; smime-type=enveloped-data; name=smime.p7m\r\n\
Content-Disposition: attachment; filename=smime.p7m\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
bm90IGEgY21zIGJsb2I=\r\n";
        let tree = parse(msg.as_bytes()).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.root().is_leaf());
        assert_eq!(
            tree.root().body.as_ref().unwrap().as_bytes(),
            b"not a cms blob"
        );
    }
}
