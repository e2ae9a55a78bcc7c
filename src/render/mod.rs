//! Turning a parsed [`MimeTree`](crate::parser::mime::MimeTree) into display
//! records: bodies, attachments, calendar previews and the final projection.

pub mod attachment;
pub mod body;
pub mod calendar;
pub mod html;
pub mod projection;
