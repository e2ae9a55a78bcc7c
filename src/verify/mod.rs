//! Signature verification.
//!
//! The first signed part of the tree (in traversal order, so a signature
//! inside a decrypted sub-message is found too) is classified into a
//! [`SignatureKind`] and dispatched to the S/MIME or OpenPGP path. Whatever
//! goes wrong along the way ends as an `Invalid` verdict.

pub mod pgp;
pub mod smime;
pub mod trust;

use tracing::{debug, warn};

use crate::error::VerificationError;
use crate::model::signature::SignatureVerdict;
use crate::parser::cms::{self, ContentInfo};
use crate::parser::mime::{is_cms_container, MimePart, MimeTree, PartId};

use self::pgp::PgpVerifier;
use self::trust::TrustStore;

/// How an S/MIME signature is attached to its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmimeLayout {
    /// `multipart/signed` with an `application/pkcs7-signature` part.
    Detached,
    /// `application/pkcs7-mime; smime-type=signed-data`.
    Opaque,
}

/// Kind of signature carried by a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Smime(SmimeLayout),
    Pgp,
    /// Signed, but with a protocol we cannot check.
    Unknown,
}

/// Classify `part`; `None` when it carries no signature.
pub fn classify(part: &MimePart) -> Option<SignatureKind> {
    if part.content_type == "multipart/signed" {
        let protocol = part.param("protocol").unwrap_or_default().to_ascii_lowercase();
        return Some(match protocol.as_str() {
            "application/pkcs7-signature" | "application/x-pkcs7-signature" => {
                SignatureKind::Smime(SmimeLayout::Detached)
            }
            "application/pgp-signature" => SignatureKind::Pgp,
            _ => SignatureKind::Unknown,
        });
    }

    if is_cms_container(part) {
        let signed = match part.param("smime-type").map(str::to_ascii_lowercase) {
            Some(kind) => kind == "signed-data",
            // Undeclared: look inside
            None => part.body.as_ref().is_some_and(|body| {
                matches!(
                    cms::parse_content_info(body.as_bytes()),
                    Ok(ContentInfo::Signed(_))
                )
            }),
        };
        return signed.then_some(SignatureKind::Smime(SmimeLayout::Opaque));
    }

    None
}

/// The first signed part of `tree`, in traversal order.
pub fn find_signed(tree: &MimeTree) -> Option<(PartId, SignatureKind)> {
    tree.walk()
        .find_map(|(id, part)| classify(part).map(|kind| (id, kind)))
}

/// Checks signatures against an immutable trust configuration.
pub struct SignatureVerifier {
    trust: TrustStore,
    pgp: Option<Box<dyn PgpVerifier>>,
    keyserver: Option<String>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("trust", &self.trust)
            .field("pgp", &self.pgp.is_some())
            .field("keyserver", &self.keyserver)
            .finish()
    }
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new(TrustStore::default(), None, None)
    }
}

impl SignatureVerifier {
    pub fn new(
        trust: TrustStore,
        pgp: Option<Box<dyn PgpVerifier>>,
        keyserver: Option<String>,
    ) -> Self {
        Self {
            trust,
            pgp,
            keyserver,
        }
    }

    /// Verify the first signature found in `tree`; `None` if unsigned.
    ///
    /// `sender` is the message's `From:` value, used to pick per-sender
    /// trust anchors and to look up OpenPGP keys.
    pub fn verify(&self, tree: &MimeTree, sender: Option<&str>) -> Option<SignatureVerdict> {
        let (id, kind) = find_signed(tree)?;
        debug!(part = id, ?kind, "Verifying signature");

        let result = match kind {
            SignatureKind::Smime(layout) => self.verify_smime(tree, id, layout, sender),
            SignatureKind::Pgp => self.verify_pgp(tree, id, sender),
            SignatureKind::Unknown => {
                let protocol = tree[id].param("protocol").unwrap_or("none");
                Ok(SignatureVerdict::invalid(format!(
                    "unsupported signature protocol '{protocol}'"
                )))
            }
        };

        Some(result.unwrap_or_else(|e| {
            warn!(error = %e, "Signature could not be verified");
            SignatureVerdict::invalid("internal error")
        }))
    }

    fn verify_smime(
        &self,
        tree: &MimeTree,
        id: PartId,
        layout: SmimeLayout,
        sender: Option<&str>,
    ) -> Result<SignatureVerdict, VerificationError> {
        let checks = match layout {
            SmimeLayout::Detached => {
                let (content, signature) = detached_parts(tree, id)?;
                smime::verify(&signature, Some(&content), &self.trust, sender)?
            }
            SmimeLayout::Opaque => {
                let blob = tree[id]
                    .body
                    .as_ref()
                    .ok_or(VerificationError::MissingSignature)?;
                smime::verify(blob.as_bytes(), None, &self.trust, sender)?
            }
        };
        Ok(checks.verdict())
    }

    fn verify_pgp(
        &self,
        tree: &MimeTree,
        id: PartId,
        sender: Option<&str>,
    ) -> Result<SignatureVerdict, VerificationError> {
        let Some(tool) = &self.pgp else {
            return Ok(SignatureVerdict::invalid("OpenPGP verification is disabled"));
        };
        let (content, signature) = detached_parts(tree, id)?;
        Ok(pgp::verify(
            tool.as_ref(),
            &content,
            &signature,
            sender,
            self.keyserver.as_deref(),
        ))
    }
}

/// Signed octets and signature bytes of a `multipart/signed` part.
fn detached_parts(tree: &MimeTree, id: PartId) -> Result<(Vec<u8>, Vec<u8>), VerificationError> {
    let part = &tree[id];
    let signature = part
        .children
        .get(1)
        .and_then(|&sig| tree[sig].body.as_ref())
        .ok_or(VerificationError::MissingSignature)?;
    let boundary = part
        .param("boundary")
        .ok_or(VerificationError::MissingSignature)?;
    let content = part
        .raw_body
        .as_deref()
        .and_then(|raw| smime::signed_content(raw, boundary))
        .ok_or(VerificationError::MissingSignature)?;
    Ok((content, signature.as_bytes().to_vec()))
}
