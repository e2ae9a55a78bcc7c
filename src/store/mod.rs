//! The mail index collaborator: resolves message identifiers to raw bytes
//! and tags.

mod directory;

pub use directory::EmlDirectory;

use std::collections::BTreeSet;

use crate::error::Result;

/// Read access to stored messages.
pub trait MailIndex: Send + Sync {
    /// Raw bytes of a message exactly as stored.
    fn get_raw_bytes(&self, message_id: &str) -> Result<Vec<u8>>;

    /// Tags attached to a message.
    fn get_tags(&self, message_id: &str) -> Result<BTreeSet<String>>;
}
