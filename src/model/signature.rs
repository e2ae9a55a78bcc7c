//! Signature verification outcome.

use serde::Serialize;

/// Tri-state verdict for a signed message.
///
/// "No signature at all" is not a verdict; the projection models it as
/// `Option::None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignatureVerdict {
    /// Content digest, signature and certificate chain all check out.
    Valid,
    /// Digest and signature are good but the signer is not anchored in
    /// the trust store.
    ValidUntrusted { reason: String },
    /// The signature does not match the content, or could not be checked.
    Invalid { reason: String },
}

impl SignatureVerdict {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// `true` for both `Valid` and `ValidUntrusted`.
    pub fn is_cryptographically_valid(&self) -> bool {
        !matches!(self, Self::Invalid { .. })
    }
}

impl std::fmt::Display for SignatureVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::ValidUntrusted { reason } => write!(f, "valid, untrusted ({reason})"),
            Self::Invalid { reason } => write!(f, "invalid ({reason})"),
        }
    }
}
