//! Minimal ASN.1 DER/BER reader for CMS structures.
//!
//! Only what CMS needs: single-byte tags, definite and indefinite lengths,
//! constructed OCTET STRINGs, OBJECT IDENTIFIERs and INTEGERs. Input is
//! untrusted, so every access is bounds-checked and nesting is capped.

use crate::error::CmsError;

pub const INTEGER: u8 = 0x02;
pub const OCTET_STRING: u8 = 0x04;
pub const NULL: u8 = 0x05;
pub const OID: u8 = 0x06;
pub const SEQUENCE: u8 = 0x30;
pub const SET: u8 = 0x31;

/// Constructed bit of an identifier octet.
const CONSTRUCTED: u8 = 0x20;

/// Maximum nesting followed while scanning indefinite-length values.
const MAX_NESTING: usize = 64;

/// Context-specific constructed tag `[n]`.
pub const fn context(n: u8) -> u8 {
    0xA0 | n
}

/// Context-specific primitive tag `[n]`.
pub const fn context_primitive(n: u8) -> u8 {
    0x80 | n
}

/// One decoded tag-length-value element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    /// The value octets (end-of-contents marker excluded).
    pub contents: &'a [u8],
    /// The complete encoding including tag and length.
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    pub fn is_constructed(&self) -> bool {
        self.tag & CONSTRUCTED != 0
    }

    /// Reader over the nested elements of a constructed value.
    pub fn reader(&self) -> DerReader<'a> {
        DerReader::new(self.contents)
    }

    /// OCTET STRING value, concatenating the segments of a constructed
    /// (BER) string. Implicitly tagged strings are accepted as well.
    pub fn octets(&self) -> Result<Vec<u8>, CmsError> {
        if !self.is_constructed() {
            return Ok(self.contents.to_vec());
        }
        let mut out = Vec::with_capacity(self.contents.len());
        let mut reader = self.reader();
        while !reader.is_empty() {
            out.extend_from_slice(&reader.read_any()?.octets()?);
        }
        Ok(out)
    }

    /// Dotted-decimal form of an OBJECT IDENTIFIER.
    pub fn oid(&self) -> Result<String, CmsError> {
        if self.tag != OID {
            return Err(CmsError::UnexpectedTag {
                expected: OID,
                found: self.tag,
            });
        }
        oid_to_string(self.contents)
    }

    /// Small non-negative INTEGER value.
    pub fn small_uint(&self) -> Result<u64, CmsError> {
        let bytes = self.contents;
        if bytes.is_empty() || bytes.len() > 8 || bytes[0] & 0x80 != 0 {
            return Err(CmsError::Malformed("integer out of range"));
        }
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }
}

/// Sequential reader over concatenated TLV elements.
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read the next element whatever its tag.
    pub fn read_any(&mut self) -> Result<Tlv<'a>, CmsError> {
        let (tlv, len) = parse_tlv(&self.data[self.pos..], self.pos, 0)?;
        self.pos += len;
        Ok(tlv)
    }

    /// Read the next element, which must carry `tag`.
    pub fn read(&mut self, tag: u8) -> Result<Tlv<'a>, CmsError> {
        match self.peek_tag() {
            Some(found) if found == tag => self.read_any(),
            Some(found) => Err(CmsError::UnexpectedTag {
                expected: tag,
                found,
            }),
            None => Err(CmsError::Truncated(self.pos)),
        }
    }

    /// Read the next element only if it carries `tag`.
    pub fn read_optional(&mut self, tag: u8) -> Result<Option<Tlv<'a>>, CmsError> {
        if self.peek_tag() == Some(tag) {
            self.read_any().map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Decode one element at the start of `data`; returns it and its encoded length.
fn parse_tlv(data: &[u8], base: usize, depth: usize) -> Result<(Tlv<'_>, usize), CmsError> {
    if depth > MAX_NESTING {
        return Err(CmsError::Malformed("nesting too deep"));
    }
    let tag = *data.first().ok_or(CmsError::Truncated(base))?;
    if tag & 0x1F == 0x1F {
        return Err(CmsError::Malformed("high tag numbers are not supported"));
    }
    let first_len = *data.get(1).ok_or(CmsError::Truncated(base + 1))?;

    if first_len == 0x80 {
        if tag & CONSTRUCTED == 0 {
            return Err(CmsError::BadLength);
        }
        // Indefinite length: walk nested elements up to the 00 00 marker.
        let mut pos = 2;
        loop {
            let rest = data.get(pos..).ok_or(CmsError::Truncated(base + pos))?;
            if rest.len() < 2 {
                return Err(CmsError::Truncated(base + pos));
            }
            if rest[0] == 0 && rest[1] == 0 {
                let tlv = Tlv {
                    tag,
                    contents: &data[2..pos],
                    raw: &data[..pos + 2],
                };
                return Ok((tlv, pos + 2));
            }
            let (_, len) = parse_tlv(rest, base + pos, depth + 1)?;
            pos += len;
        }
    }

    let (len, header_len) = if first_len < 0x80 {
        (first_len as usize, 2)
    } else {
        let count = (first_len & 0x7F) as usize;
        if count > 4 {
            return Err(CmsError::BadLength);
        }
        let bytes = data.get(2..2 + count).ok_or(CmsError::Truncated(base + 2))?;
        let len = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        (len, 2 + count)
    };

    let end = header_len
        .checked_add(len)
        .ok_or(CmsError::BadLength)?;
    if end > data.len() {
        return Err(CmsError::Truncated(base + data.len()));
    }
    let tlv = Tlv {
        tag,
        contents: &data[header_len..end],
        raw: &data[..end],
    };
    Ok((tlv, end))
}

/// Decode OBJECT IDENTIFIER contents into dotted-decimal form.
pub fn oid_to_string(bytes: &[u8]) -> Result<String, CmsError> {
    let mut arcs: Vec<u64> = Vec::new();
    let mut value: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if value > (u64::MAX >> 7) {
            return Err(CmsError::Malformed("object identifier arc overflow"));
        }
        value = (value << 7) | u64::from(b & 0x7F);
        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let first = if value < 80 { value / 40 } else { 2 };
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        } else if i + 1 == bytes.len() {
            return Err(CmsError::Malformed("truncated object identifier"));
        }
    }
    if arcs.is_empty() {
        return Err(CmsError::Malformed("empty object identifier"));
    }
    Ok(arcs
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("."))
}

/// Encode a definite-length header followed by `contents`.
pub fn encode(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(contents.len() + 6);
    out.push(tag);
    let len = contents.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(contents);
    out
}
