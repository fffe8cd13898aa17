//! ServiceNow Table API client for knowledge-base exports.
//!
//! This crate provides:
//! - [`ServiceNowClient`] — authenticated, paginated reads of
//!   `kb_knowledge_base`, `kb_category`, and `kb_knowledge`
//! - Row validation at the fetch boundary: malformed rows come back as
//!   [`RejectedRecord`](kbmirror_shared::RejectedRecord)s, not errors

pub mod client;
mod records;

pub use client::ServiceNowClient;
