//! A directory of `.eml` files used as a mail index.
//!
//! Message identifiers are file names relative to the directory. Tags come
//! from the `X-Keywords` and `X-Gmail-Labels` headers that mail clients and
//! Takeout exports write.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::MailIndex;
use crate::error::{MailError, Result};
use crate::parser::header::{decode_encoded_words, split_header_block, split_unquoted, Headers};

/// Headers are never expected beyond this many bytes.
const HEADER_READ_LIMIT: u64 = 256 * 1024;

const TAG_HEADERS: &[&str] = &["X-Keywords", "X-Gmail-Labels"];

/// Messages stored as individual files in one directory.
#[derive(Debug, Clone)]
pub struct EmlDirectory {
    root: PathBuf,
}

impl EmlDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an identifier, refusing anything that leaves the directory.
    fn path_of(&self, message_id: &str) -> Result<PathBuf> {
        let relative = Path::new(message_id);
        let plain = !message_id.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(MailError::NotFound(message_id.to_string()));
        }
        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(MailError::NotFound(message_id.to_string()));
        }
        Ok(path)
    }
}

impl MailIndex for EmlDirectory {
    fn get_raw_bytes(&self, message_id: &str) -> Result<Vec<u8>> {
        let path = self.path_of(message_id)?;
        debug!(path = %path.display(), "Reading message");
        std::fs::read(&path).map_err(|e| MailError::io(&path, e))
    }

    fn get_tags(&self, message_id: &str) -> Result<BTreeSet<String>> {
        let path = self.path_of(message_id)?;
        let mut head = Vec::new();
        File::open(&path)
            .and_then(|f| f.take(HEADER_READ_LIMIT).read_to_end(&mut head))
            .map_err(|e| MailError::io(&path, e))?;

        let (block, _) = split_header_block(&head);
        Ok(tags_from_headers(&Headers::parse(block)))
    }
}

/// Comma-separated tags from the tag headers, decoded and de-duplicated.
pub fn tags_from_headers(headers: &Headers) -> BTreeSet<String> {
    TAG_HEADERS
        .iter()
        .flat_map(|name| headers.get_all(name))
        .flat_map(|value| split_unquoted(&decode_encoded_words(value), ','))
        .map(|tag| tag.trim().trim_matches('"').trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_read_message_and_tags() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("one.eml")
            .write_str(
                "From: a@example.com\r\n\
X-Keywords: work, $Important\r\n\
X-Gmail-Labels: Inbox,\"Travel, 2024\",work\r\n\
Subject: hi\r\n\
\r\n\
X-Keywords: not-a-header\r\n",
            )
            .unwrap();

        let store = EmlDirectory::new(dir.path());
        assert!(store.get_raw_bytes("one.eml").unwrap().starts_with(b"From:"));
        let tags: Vec<_> = store.get_tags("one.eml").unwrap().into_iter().collect();
        assert_eq!(tags, vec!["$Important", "Inbox", "Travel, 2024", "work"]);
    }

    #[test]
    fn test_unknown_and_escaping_ids() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("inner").create_dir_all().unwrap();
        dir.child("inner/secret.eml").write_str("From: x\r\n\r\n").unwrap();
        let store = EmlDirectory::new(dir.path().join("inner"));

        for id in ["missing.eml", "../inner/secret.eml", "/etc/passwd", ""] {
            assert!(
                matches!(store.get_raw_bytes(id), Err(MailError::NotFound(_))),
                "{id} should not resolve"
            );
        }
        assert!(store.get_tags("secret.eml").unwrap().is_empty());
    }
}
