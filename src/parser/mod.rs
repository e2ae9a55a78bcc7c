//! Decoding of raw messages: headers, MIME structure, CMS containers and
//! iCalendar payloads.

pub mod cms;
pub mod der;
pub mod header;
pub mod ical;
pub mod mime;
