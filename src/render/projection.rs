//! Projection building: one pass over a message producing the display record.

use std::collections::BTreeSet;
use std::path::Path;

use openssl::pkey::PKey;
use openssl::x509::X509;
use tracing::{debug, info};

use crate::config::{Config, Identity};
use crate::error::{MailError, Result};
use crate::model::address::EmailAddress;
use crate::model::attachment::AttachmentPayload;
use crate::model::mail::MessageProjection;
use crate::parser::header::{extract_angle_bracket, parse_date, Headers};
use crate::parser::mime::{DecryptionKey, MimeTree, MimeWalker};
use crate::render::attachment;
use crate::render::body::{self, ContentFilters};
use crate::render::html::{HtmlSanitizer, Sanitizer};
use crate::verify::pgp::{GpgCli, PgpVerifier};
use crate::verify::trust::TrustStore;
use crate::verify::SignatureVerifier;

/// Everything needed to render messages, built once and shared read-only.
pub struct Renderer {
    walker: MimeWalker,
    filters: ContentFilters,
    sanitizer: Box<dyn Sanitizer>,
    identities: Vec<Identity>,
    verifier: SignatureVerifier,
    max_message_size: usize,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            walker: MimeWalker::default(),
            filters: ContentFilters::default(),
            sanitizer: Box::new(HtmlSanitizer::default()),
            identities: Vec::new(),
            verifier: SignatureVerifier::default(),
            max_message_size: usize::MAX,
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("walker", &self.walker)
            .field("identities", &self.identities)
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    /// Build the runtime configuration: compile filters, load trust anchors
    /// and decryption keys, and set up the OpenPGP tool.
    pub fn from_config(config: &Config) -> Result<Self> {
        let keys = config
            .smime
            .decryption
            .iter()
            .map(|id| load_decryption_key(&id.cert, &id.key))
            .collect::<Result<Vec<_>>>()?;
        let trust = TrustStore::from_config(&config.smime)?;
        let pgp = config
            .pgp
            .enabled
            .then(|| Box::new(GpgCli::new(&config.pgp)) as Box<dyn PgpVerifier>);

        info!(
            identities = config.identities.len(),
            decryption_keys = keys.len(),
            pgp = pgp.is_some(),
            "Renderer configured"
        );

        Ok(Self {
            walker: MimeWalker::new(keys, config.limits.max_depth),
            filters: ContentFilters::compile(&config.filters),
            sanitizer: Box::new(HtmlSanitizer::default()),
            identities: config.identities.clone(),
            verifier: SignatureVerifier::new(trust, pgp, config.pgp.keyserver.clone()),
            max_message_size: config.limits.max_message_size,
        })
    }

    pub fn with_identities(mut self, identities: Vec<Identity>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_filters(mut self, filters: ContentFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Box<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_walker(mut self, walker: MimeWalker) -> Self {
        self.walker = walker;
        self
    }

    /// Decode a raw message, enforcing the size limit.
    pub fn parse(&self, raw: &[u8]) -> Result<MimeTree> {
        if raw.len() > self.max_message_size {
            return Err(MailError::TooLarge {
                size: raw.len(),
                limit: self.max_message_size,
            });
        }
        self.walker.parse(raw)
    }

    /// Parse and project a raw message.
    pub fn render(
        &self,
        raw: &[u8],
        tags: BTreeSet<String>,
        include_content: bool,
    ) -> Result<MessageProjection> {
        let tree = self.parse(raw)?;
        Ok(self.project(&tree, tags, include_content))
    }

    /// Build the projection of an already parsed message.
    pub fn project(
        &self,
        tree: &MimeTree,
        tags: BTreeSet<String>,
        include_content: bool,
    ) -> MessageProjection {
        let headers = &tree.root().headers;
        let text = |name: &str| headers.get_decoded(name).unwrap_or_default();
        let optional = |name: &str| headers.get_decoded(name).filter(|v| !v.is_empty());

        let from = text("From");
        let message_id = optional("Message-ID");
        let in_reply_to = self_reference_guard(message_id.as_deref(), optional("In-Reply-To"));
        let forwarded_to = optional("X-Forwarded-To");
        let date = text("Date");

        let body = body::extract(tree, &self.filters, self.sanitizer.as_ref());
        let attachments = attachment::extract(
            tree,
            include_content,
            &self.identities,
            forwarded_to.as_deref(),
        );
        let signature = self.verifier.verify(tree, sender_address(headers).as_deref());

        debug!(
            attachments = attachments.len(),
            signed = signature.is_some(),
            "Projected message"
        );

        MessageProjection {
            to: text("To"),
            cc: text("Cc"),
            bcc: text("Bcc"),
            date_utc: parse_date(&date),
            date,
            subject: text("Subject"),
            message_id,
            in_reply_to,
            references: optional("References"),
            reply_to: optional("Reply-To"),
            forwarded_to,
            delivered_to: optional("Delivered-To"),
            from,
            body,
            attachments,
            tags,
            signature,
        }
    }

    /// The `index`-th attachment of a raw message, in projection order.
    pub fn attachment(&self, raw: &[u8], index: usize) -> Result<Option<AttachmentPayload>> {
        let tree = self.parse(raw)?;
        Ok(attachment::payload(&tree, index))
    }
}

/// Drop an `In-Reply-To` that points at the message itself.
fn self_reference_guard(message_id: Option<&str>, in_reply_to: Option<String>) -> Option<String> {
    match (message_id, in_reply_to) {
        (Some(own), Some(parent)) if extract_angle_bracket(own) == extract_angle_bracket(&parent) => {
            debug!(message_id = own, "Ignoring self-referential In-Reply-To");
            None
        }
        (_, in_reply_to) => in_reply_to,
    }
}

fn sender_address(headers: &Headers) -> Option<String> {
    let from = headers.get_decoded("From")?;
    EmailAddress::parse_list(&from)
        .into_iter()
        .next()
        .map(|a| a.address)
}

fn load_decryption_key(cert: &Path, key: &Path) -> Result<DecryptionKey> {
    let cert_pem = std::fs::read(cert).map_err(|e| MailError::io(cert, e))?;
    let key_pem = std::fs::read(key).map_err(|e| MailError::io(key, e))?;
    let cert = X509::from_pem(&cert_pem)
        .map_err(|e| MailError::Config(format!("{}: {e}", cert.display())))?;
    let key = PKey::private_key_from_pem(&key_pem)
        .map_err(|e| MailError::Config(format!("{}: {e}", key.display())))?;
    Ok(DecryptionKey { cert, key })
}

/// Projection with default settings and no tags.
pub fn render(raw: &[u8]) -> Result<MessageProjection> {
    Renderer::default().render(raw, BTreeSet::new(), false)
}
