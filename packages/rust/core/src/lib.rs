//! Export pipeline for kbmirror.
//!
//! Ties the ServiceNow client, extraction, Markdown rendering, and file
//! writing together into one `export` run (see [`export::run_export`]).

pub mod document;
pub mod export;
pub mod extract;
pub mod sanitize;
pub mod writer;

pub use export::{ExportResult, FailedWrite, ProgressReporter, SilentProgress, run_export};
pub use extract::{EmptyReason, ExtractionPlan, ExtractionReport, OutputUnit, extract};
