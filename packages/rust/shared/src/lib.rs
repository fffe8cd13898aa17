//! Shared types, error model, and configuration for kbmirror.
//!
//! This crate is the foundation depended on by all other kbmirror crates.
//! It provides:
//! - [`KbMirrorError`] — the unified error type
//! - Catalog types ([`KnowledgeBase`], [`Category`], [`Article`], [`Catalog`])
//! - Configuration ([`AppConfig`], [`ExportConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, Credentials, DefaultsConfig, ExportConfig, ExportOverrides, ServiceNowConfig,
    config_dir, config_file_path, init_config, instance_url, load_config, load_config_from,
};
pub use error::{KbMirrorError, Result};
pub use types::{
    AllowList, Article, Author, Catalog, Category, Fetched, KnowledgeBase, RejectedRecord, Table,
    TIMESTAMP_FORMAT,
};
