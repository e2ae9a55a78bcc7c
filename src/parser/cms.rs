//! CMS / PKCS#7 structures (RFC 5652, RFC 3274) as far as S/MIME needs them.
//!
//! Parsing is purely structural. Cryptographic checks live in
//! [`crate::verify::smime`]; decryption of enveloped data is delegated to
//! OpenSSL by the MIME walker.

use crate::error::CmsError;
use crate::parser::der::{self, context, DerReader, Tlv};

/// Object identifiers used by CMS and S/MIME.
pub mod oid {
    pub const DATA: &str = "1.2.840.113549.1.7.1";
    pub const SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
    pub const ENVELOPED_DATA: &str = "1.2.840.113549.1.7.3";
    pub const COMPRESSED_DATA: &str = "1.2.840.113549.1.9.16.1.9";

    pub const CONTENT_TYPE: &str = "1.2.840.113549.1.9.3";
    pub const MESSAGE_DIGEST: &str = "1.2.840.113549.1.9.4";

    pub const ZLIB: &str = "1.2.840.113549.1.9.16.3.8";

    pub const MD5: &str = "1.2.840.113549.2.5";
    pub const SHA1: &str = "1.3.14.3.2.26";
    pub const SHA224: &str = "2.16.840.1.101.3.4.2.4";
    pub const SHA256: &str = "2.16.840.1.101.3.4.2.1";
    pub const SHA384: &str = "2.16.840.1.101.3.4.2.2";
    pub const SHA512: &str = "2.16.840.1.101.3.4.2.3";

    pub const RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
    pub const MD5_WITH_RSA: &str = "1.2.840.113549.1.1.4";
    pub const SHA1_WITH_RSA: &str = "1.2.840.113549.1.1.5";
    pub const RSASSA_PSS: &str = "1.2.840.113549.1.1.10";
    pub const SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";
    pub const SHA384_WITH_RSA: &str = "1.2.840.113549.1.1.12";
    pub const SHA512_WITH_RSA: &str = "1.2.840.113549.1.1.13";
    pub const SHA224_WITH_RSA: &str = "1.2.840.113549.1.1.14";
    pub const MGF1: &str = "1.2.840.113549.1.1.8";

    pub const EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
    pub const ECDSA_WITH_SHA1: &str = "1.2.840.10045.4.1";
    pub const ECDSA_WITH_SHA224: &str = "1.2.840.10045.4.3.1";
    pub const ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
    pub const ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";
    pub const ECDSA_WITH_SHA512: &str = "1.2.840.10045.4.3.4";
}

/// Top-level `ContentInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentInfo {
    Signed(SignedData),
    /// Enveloped data is opened by OpenSSL; only its presence is recorded.
    Enveloped,
    Compressed(CompressedData),
    Other(String),
}

/// `AlgorithmIdentifier` with its parameters kept as raw DER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmIdentifier {
    pub oid: String,
    pub parameters: Option<Vec<u8>>,
}

/// `SignedData` (RFC 5652 §5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedData {
    pub digest_algorithms: Vec<AlgorithmIdentifier>,
    /// `eContentType` of the encapsulated content.
    pub content_type: String,
    /// Encapsulated content; `None` for detached signatures.
    pub content: Option<Vec<u8>>,
    /// DER encodings of the embedded X.509 certificates.
    pub certificates: Vec<Vec<u8>>,
    pub signer_infos: Vec<SignerInfo>,
}

/// How a `SignerInfo` names its certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerIdentifier {
    /// DER of the issuer `Name` and the serial number's INTEGER contents.
    IssuerAndSerial { issuer: Vec<u8>, serial: Vec<u8> },
    SubjectKeyId(Vec<u8>),
}

/// The authenticated attributes of a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAttributes {
    /// The attributes re-encoded as a `SET OF`, the form that is signed.
    pub signed_form: Vec<u8>,
    pub message_digest: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

/// `SignerInfo` (RFC 5652 §5.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerInfo {
    pub sid: SignerIdentifier,
    pub digest_algorithm: AlgorithmIdentifier,
    pub signed_attrs: Option<SignedAttributes>,
    pub signature_algorithm: AlgorithmIdentifier,
    pub signature: Vec<u8>,
}

/// `CompressedData` (RFC 3274).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedData {
    pub algorithm: AlgorithmIdentifier,
    pub content: Vec<u8>,
}

/// Parse a DER/BER `ContentInfo`.
pub fn parse_content_info(data: &[u8]) -> Result<ContentInfo, CmsError> {
    let outer = DerReader::new(data).read(der::SEQUENCE)?;
    let mut reader = outer.reader();
    let content_type = reader.read(der::OID)?.oid()?;
    let explicit = reader.read_optional(context(0))?;

    match content_type.as_str() {
        oid::SIGNED_DATA => parse_signed_data(explicit_content(explicit)?).map(ContentInfo::Signed),
        oid::ENVELOPED_DATA => Ok(ContentInfo::Enveloped),
        oid::COMPRESSED_DATA => {
            parse_compressed_data(explicit_content(explicit)?).map(ContentInfo::Compressed)
        }
        _ => Ok(ContentInfo::Other(content_type)),
    }
}

/// The SEQUENCE inside `content [0] EXPLICIT`.
fn explicit_content(explicit: Option<Tlv<'_>>) -> Result<Tlv<'_>, CmsError> {
    explicit
        .ok_or(CmsError::Malformed("ContentInfo without content"))?
        .reader()
        .read(der::SEQUENCE)
}

fn parse_algorithm(tlv: Tlv<'_>) -> Result<AlgorithmIdentifier, CmsError> {
    let mut reader = tlv.reader();
    let oid = reader.read(der::OID)?.oid()?;
    let parameters = if reader.is_empty() {
        None
    } else {
        let params = reader.read_any()?;
        (params.tag != der::NULL).then(|| params.raw.to_vec())
    };
    Ok(AlgorithmIdentifier { oid, parameters })
}

/// `EncapsulatedContentInfo`: returns the content type and optional content.
fn parse_encapsulated(tlv: Tlv<'_>) -> Result<(String, Option<Vec<u8>>), CmsError> {
    let mut reader = tlv.reader();
    let content_type = reader.read(der::OID)?.oid()?;
    let content = match reader.read_optional(context(0))? {
        Some(explicit) => Some(explicit.reader().read_any()?.octets()?),
        None => None,
    };
    Ok((content_type, content))
}

fn parse_signed_data(tlv: Tlv<'_>) -> Result<SignedData, CmsError> {
    let mut reader = tlv.reader();
    reader.read(der::INTEGER)?;

    let mut digest_algorithms = Vec::new();
    let mut set = reader.read(der::SET)?.reader();
    while !set.is_empty() {
        digest_algorithms.push(parse_algorithm(set.read(der::SEQUENCE)?)?);
    }

    let (content_type, content) = parse_encapsulated(reader.read(der::SEQUENCE)?)?;

    let mut certificates = Vec::new();
    if let Some(certs) = reader.read_optional(context(0))? {
        let mut certs = certs.reader();
        while !certs.is_empty() {
            let cert = certs.read_any()?;
            // Attribute certificates and other choices carry context tags
            if cert.tag == der::SEQUENCE {
                certificates.push(cert.raw.to_vec());
            }
        }
    }
    reader.read_optional(context(1))?;

    let mut signer_infos = Vec::new();
    let mut signers = reader.read(der::SET)?.reader();
    while !signers.is_empty() {
        signer_infos.push(parse_signer_info(signers.read(der::SEQUENCE)?)?);
    }

    Ok(SignedData {
        digest_algorithms,
        content_type,
        content,
        certificates,
        signer_infos,
    })
}

fn parse_signer_info(tlv: Tlv<'_>) -> Result<SignerInfo, CmsError> {
    let mut reader = tlv.reader();
    reader.read(der::INTEGER)?;

    let sid = match reader.peek_tag() {
        Some(der::SEQUENCE) => {
            let mut ias = reader.read(der::SEQUENCE)?.reader();
            let issuer = ias.read(der::SEQUENCE)?.raw.to_vec();
            let serial = ias.read(der::INTEGER)?.contents.to_vec();
            SignerIdentifier::IssuerAndSerial { issuer, serial }
        }
        Some(tag) if tag == der::context_primitive(0) || tag == context(0) => {
            SignerIdentifier::SubjectKeyId(reader.read_any()?.octets()?)
        }
        Some(found) => {
            return Err(CmsError::UnexpectedTag {
                expected: der::SEQUENCE,
                found,
            })
        }
        None => return Err(CmsError::Malformed("SignerInfo without identifier")),
    };

    let digest_algorithm = parse_algorithm(reader.read(der::SEQUENCE)?)?;
    let signed_attrs = reader
        .read_optional(context(0))?
        .map(parse_signed_attributes)
        .transpose()?;
    let signature_algorithm = parse_algorithm(reader.read(der::SEQUENCE)?)?;
    let signature = reader.read(der::OCTET_STRING)?.octets()?;

    Ok(SignerInfo {
        sid,
        digest_algorithm,
        signed_attrs,
        signature_algorithm,
        signature,
    })
}

fn parse_signed_attributes(tlv: Tlv<'_>) -> Result<SignedAttributes, CmsError> {
    let mut message_digest = None;
    let mut content_type = None;

    let mut attrs = tlv.reader();
    while !attrs.is_empty() {
        let mut attr = attrs.read(der::SEQUENCE)?.reader();
        let attr_type = attr.read(der::OID)?.oid()?;
        let mut values = attr.read(der::SET)?.reader();
        match attr_type.as_str() {
            oid::MESSAGE_DIGEST => {
                message_digest = Some(values.read(der::OCTET_STRING)?.octets()?);
            }
            oid::CONTENT_TYPE => {
                content_type = Some(values.read(der::OID)?.oid()?);
            }
            _ => {}
        }
    }

    // The signature covers the attributes with an explicit SET OF tag
    // instead of the [0] IMPLICIT tag they are transmitted with.
    Ok(SignedAttributes {
        signed_form: der::encode(der::SET, tlv.contents),
        message_digest,
        content_type,
    })
}

fn parse_compressed_data(tlv: Tlv<'_>) -> Result<CompressedData, CmsError> {
    let mut reader = tlv.reader();
    reader.read(der::INTEGER)?;
    let algorithm = parse_algorithm(reader.read(der::SEQUENCE)?)?;
    let (_, content) = parse_encapsulated(reader.read(der::SEQUENCE)?)?;
    Ok(CompressedData {
        algorithm,
        content: content.ok_or(CmsError::Malformed("CompressedData without content"))?,
    })
}

/// Parameters of an RSASSA-PSS signature (RFC 4055 §3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PssParameters {
    pub hash: String,
    pub mgf1_hash: String,
    pub salt_length: u64,
}

impl PssParameters {
    /// Decode `RSASSA-PSS-params`, applying the SHA-1 / 20-byte defaults.
    pub fn parse(params: Option<&[u8]>) -> Result<Self, CmsError> {
        let mut out = Self {
            hash: oid::SHA1.to_string(),
            mgf1_hash: oid::SHA1.to_string(),
            salt_length: 20,
        };
        let Some(params) = params else {
            return Ok(out);
        };

        let mut reader = DerReader::new(params).read(der::SEQUENCE)?.reader();
        if let Some(hash) = reader.read_optional(context(0))? {
            out.hash = parse_algorithm(hash.reader().read(der::SEQUENCE)?)?.oid;
        }
        if let Some(mgf) = reader.read_optional(context(1))? {
            let mgf = parse_algorithm(mgf.reader().read(der::SEQUENCE)?)?;
            if mgf.oid != oid::MGF1 {
                return Err(CmsError::Malformed("unsupported mask generation function"));
            }
            let inner = mgf
                .parameters
                .ok_or(CmsError::Malformed("MGF1 without hash"))?;
            out.mgf1_hash = parse_algorithm(DerReader::new(&inner).read(der::SEQUENCE)?)?.oid;
        }
        if let Some(salt) = reader.read_optional(context(2))? {
            out.salt_length = salt.reader().read(der::INTEGER)?.small_uint()?;
        }
        Ok(out)
    }
}
