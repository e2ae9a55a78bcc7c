//! S/MIME (CMS SignedData) verification.
//!
//! Three checks are made independently: the recomputed content digest
//! against the declared one, the signature over the signed attributes (or
//! the content itself when there are none), and the signer's certificate
//! chain against the trust store.

use openssl::hash::{hash, MessageDigest};
use openssl::pkey::{PKey, Public};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};
use openssl::x509::X509;
use tracing::debug;

use crate::error::{CmsError, VerificationError};
use crate::model::signature::SignatureVerdict;
use crate::parser::cms::{
    self, oid, AlgorithmIdentifier, ContentInfo, PssParameters, SignerIdentifier, SignerInfo,
};
use crate::verify::trust::TrustStore;

/// Pass/fail of each verification step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checks {
    pub hash: bool,
    pub signature: bool,
    /// `Err` carries the chain error.
    pub chain: Result<(), String>,
}

impl Checks {
    /// Combine the steps into a verdict.
    pub fn verdict(self) -> SignatureVerdict {
        match self {
            Checks { hash: false, .. } => SignatureVerdict::invalid("message digest mismatch"),
            Checks {
                signature: false, ..
            } => SignatureVerdict::invalid("signature mismatch"),
            Checks { chain: Ok(()), .. } => SignatureVerdict::Valid,
            Checks {
                chain: Err(reason), ..
            } => SignatureVerdict::ValidUntrusted { reason },
        }
    }
}

/// Verify a CMS `SignedData` blob.
///
/// `detached_content` is the signed content of a `multipart/signed`
/// message; for opaque signatures it is `None` and the encapsulated
/// content is checked instead.
pub fn verify(
    cms_blob: &[u8],
    detached_content: Option<&[u8]>,
    trust: &TrustStore,
    sender: Option<&str>,
) -> Result<Checks, VerificationError> {
    let signed = match cms::parse_content_info(cms_blob)? {
        ContentInfo::Signed(signed) => signed,
        ContentInfo::Enveloped => {
            return Err(CmsError::UnsupportedContentType(oid::ENVELOPED_DATA.into()).into())
        }
        ContentInfo::Compressed(_) => {
            return Err(CmsError::UnsupportedContentType(oid::COMPRESSED_DATA.into()).into())
        }
        ContentInfo::Other(other) => return Err(CmsError::UnsupportedContentType(other).into()),
    };

    let content = detached_content
        .or(signed.content.as_deref())
        .ok_or(VerificationError::MissingSignature)?;
    let signer = signed
        .signer_infos
        .first()
        .ok_or(VerificationError::SignerNotFound)?;

    let certificates = signed
        .certificates
        .iter()
        .map(|der| X509::from_der(der))
        .collect::<Result<Vec<_>, _>>()?;
    let position = certificates
        .iter()
        .position(|cert| matches_signer(cert, &signer.sid))
        .ok_or(VerificationError::SignerNotFound)?;
    let mut others = certificates;
    let cert = others.remove(position);

    let digest = digest_for(&signer.digest_algorithm.oid)?;
    let computed = hash(digest, content)?;

    // With signed attributes the digest is declared there and the signature
    // covers the attributes; without them it covers the content directly.
    let (hash_ok, signed_bytes) = match &signer.signed_attrs {
        Some(attrs) => {
            let declared = attrs.message_digest.as_deref().unwrap_or_default();
            (declared == &computed[..], attrs.signed_form.as_slice())
        }
        None => (true, content),
    };

    let public_key = cert.public_key()?;
    let signature_ok = check_signature(signer, digest, &public_key, signed_bytes)?;

    let chain = if hash_ok && signature_ok {
        trust.verify_chain(&cert, &others, sender)
    } else {
        Err("not checked".to_string())
    };

    debug!(
        hash = hash_ok,
        signature = signature_ok,
        chain = chain.is_ok(),
        "S/MIME checks"
    );
    Ok(Checks {
        hash: hash_ok,
        signature: signature_ok,
        chain,
    })
}

fn matches_signer(cert: &X509, sid: &SignerIdentifier) -> bool {
    match sid {
        SignerIdentifier::IssuerAndSerial { issuer, serial } => {
            let issuer_ok = cert
                .issuer_name()
                .to_der()
                .is_ok_and(|der| der == *issuer);
            let serial_ok = cert
                .serial_number()
                .to_bn()
                .is_ok_and(|bn| bn.to_vec() == strip_leading_zeros(serial));
            issuer_ok && serial_ok
        }
        SignerIdentifier::SubjectKeyId(id) => cert
            .subject_key_id()
            .is_some_and(|ski| ski.as_slice() == id.as_slice()),
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn digest_for(algorithm: &str) -> Result<MessageDigest, VerificationError> {
    Ok(match algorithm {
        oid::MD5 => MessageDigest::md5(),
        oid::SHA1 => MessageDigest::sha1(),
        oid::SHA224 => MessageDigest::sha224(),
        oid::SHA256 => MessageDigest::sha256(),
        oid::SHA384 => MessageDigest::sha384(),
        oid::SHA512 => MessageDigest::sha512(),
        other => return Err(VerificationError::UnsupportedDigest(other.to_string())),
    })
}

fn check_signature(
    signer: &SignerInfo,
    digest: MessageDigest,
    public_key: &PKey<Public>,
    data: &[u8],
) -> Result<bool, VerificationError> {
    let AlgorithmIdentifier { oid: algorithm, parameters } = &signer.signature_algorithm;

    let mut verifier = match algorithm.as_str() {
        oid::RSASSA_PSS => {
            let params = PssParameters::parse(parameters.as_deref())?;
            let salt_length = i32::try_from(params.salt_length)
                .map_err(|_| CmsError::Malformed("PSS salt length out of range"))?;
            let mut verifier = Verifier::new(digest_for(&params.hash)?, public_key)?;
            verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
            verifier.set_rsa_pss_saltlen(RsaPssSaltlen::custom(salt_length))?;
            verifier.set_rsa_mgf1_md(digest_for(&params.mgf1_hash)?)?;
            verifier
        }
        oid::RSA_ENCRYPTION
        | oid::MD5_WITH_RSA
        | oid::SHA1_WITH_RSA
        | oid::SHA224_WITH_RSA
        | oid::SHA256_WITH_RSA
        | oid::SHA384_WITH_RSA
        | oid::SHA512_WITH_RSA => {
            let mut verifier = Verifier::new(digest, public_key)?;
            verifier.set_rsa_padding(Padding::PKCS1)?;
            verifier
        }
        oid::EC_PUBLIC_KEY
        | oid::ECDSA_WITH_SHA1
        | oid::ECDSA_WITH_SHA224
        | oid::ECDSA_WITH_SHA256
        | oid::ECDSA_WITH_SHA384
        | oid::ECDSA_WITH_SHA512 => Verifier::new(digest, public_key)?,
        other => return Err(VerificationError::UnsupportedSignature(other.to_string())),
    };

    // A malformed signature is a mismatch, not a failure to verify.
    Ok(verifier
        .verify_oneshot(&signer.signature, data)
        .unwrap_or_else(|e| {
            debug!(error = %e, "Signature rejected by OpenSSL");
            false
        }))
}

/// Recover the signed octets of a `multipart/signed` body.
///
/// Returns the first body part exactly as transmitted, from the line after
/// the opening delimiter up to the line break preceding the next delimiter,
/// with line endings normalized to CRLF.
pub fn signed_content(raw_body: &[u8], boundary: &str) -> Option<Vec<u8>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut start = None;
    let mut pos = 0;
    while pos <= raw_body.len() {
        let line_end = raw_body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(raw_body.len(), |i| pos + i);
        let line = &raw_body[pos..line_end];
        if is_delimiter_line(line, delimiter) {
            match start {
                None => start = Some(line_end + 1),
                Some(start) => {
                    // The line break before a delimiter belongs to the delimiter
                    let mut end = pos.checked_sub(1)?;
                    if end > start && raw_body[end - 1] == b'\r' {
                        end -= 1;
                    }
                    let content = raw_body.get(start..end.max(start))?;
                    return Some(to_crlf(content));
                }
            }
        }
        pos = line_end + 1;
    }
    None
}

/// A delimiter line is the delimiter followed by `--`, whitespace or nothing.
fn is_delimiter_line(line: &[u8], delimiter: &[u8]) -> bool {
    match line.strip_prefix(delimiter) {
        Some(rest) => rest.starts_with(b"--") || rest.iter().all(u8::is_ascii_whitespace),
        None => false,
    }
}

/// Normalize bare LF line endings to CRLF.
pub fn to_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut prev = 0u8;
    for &b in data {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_verdict() {
        let ok = Checks {
            hash: true,
            signature: true,
            chain: Ok(()),
        };
        assert_eq!(ok.clone().verdict(), SignatureVerdict::Valid);
        assert_eq!(
            Checks {
                chain: Err("self-signed".into()),
                ..ok.clone()
            }
            .verdict(),
            SignatureVerdict::ValidUntrusted {
                reason: "self-signed".into()
            }
        );
        assert!(!Checks {
            hash: false,
            ..ok.clone()
        }
        .verdict()
        .is_cryptographically_valid());
        assert!(!Checks {
            signature: false,
            ..ok
        }
        .verdict()
        .is_cryptographically_valid());
    }

    #[test]
    fn test_signed_content_extraction() {
        let body = b"This is an S/MIME signed message\r\n\r\n--abc\r\nContent-Type: text/plain\r\n\r\nHello\r\n--abc\r\nContent-Type: application/pkcs7-signature\r\n\r\nAAAA\r\n--abc--\r\n";
        assert_eq!(
            signed_content(body, "abc").unwrap(),
            b"Content-Type: text/plain\r\n\r\nHello"
        );
    }

    #[test]
    fn test_signed_content_normalizes_line_endings() {
        let body = b"--abc\nContent-Type: text/plain\n\nline1\nline2\n--abc\nsig\n--abc--\n";
        assert_eq!(
            signed_content(body, "abc").unwrap(),
            b"Content-Type: text/plain\r\n\r\nline1\r\nline2"
        );
    }

    #[test]
    fn test_signed_content_ignores_longer_boundaries() {
        let body = b"--abc\r\nContent-Type: multipart/mixed; boundary=abcdef\r\n\r\n--abcdef\r\n\r\nHi\r\n--abcdef--\r\n--abc \r\nsig\r\n--abc--\r\n";
        assert_eq!(
            signed_content(body, "abc").unwrap(),
            b"Content-Type: multipart/mixed; boundary=abcdef\r\n\r\n--abcdef\r\n\r\nHi\r\n--abcdef--"
        );
    }

    #[test]
    fn test_signed_content_requires_two_delimiters() {
        assert!(signed_content(b"--abc\r\nonly one part\r\n", "abc").is_none());
        assert!(signed_content(b"no delimiters", "abc").is_none());
    }

    #[test]
    fn test_to_crlf() {
        assert_eq!(to_crlf(b"a\nb\r\nc"), b"a\r\nb\r\nc");
    }

    #[test]
    fn test_garbage_blob_is_an_error() {
        assert!(verify(b"garbage", Some(b"x"), &TrustStore::default(), None).is_err());
    }
}
