//! `mailview`: turns raw RFC 5322 messages into display-ready projections.
//!
//! The pipeline walks the MIME tree (decrypting and unwrapping CMS
//! envelopes along the way), extracts sanitized plain/HTML bodies and
//! attachments, summarizes calendar invitations, and verifies S/MIME or
//! OpenPGP signatures. [`service`] exposes the two read operations on top
//! of a [`store::MailIndex`].

pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod render;
pub mod service;
pub mod store;
pub mod verify;
