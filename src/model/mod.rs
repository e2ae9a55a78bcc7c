//! Data model records produced by the rendering pipeline.

pub mod address;
pub mod attachment;
pub mod calendar;
pub mod mail;
pub mod signature;
