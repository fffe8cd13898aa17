//! Core domain types: the knowledge-base catalog as fetched from ServiceNow.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Format used by the Table API for `sys_*_on` fields and by the metadata header.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A `kb_knowledge_base` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    /// Source-assigned identifier.
    pub sys_id: String,
    /// Display name (`title`).
    pub name: String,
}

/// A `kb_category` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub sys_id: String,
    /// Display name (`label`).
    pub name: String,
    /// Owning knowledge base, when the row references one directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
    /// Parent category for nested categories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Who wrote an article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// `sys_user` identifier.
    pub sys_id: String,
    /// Display name; empty until resolved.
    pub name: String,
}

/// A `kb_knowledge` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub sys_id: String,
    /// Title with internal whitespace collapsed.
    pub title: String,
    /// Raw HTML body.
    pub body_html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    /// Rating as the instance reported it, kept only when numeric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
}

// ---------------------------------------------------------------------------
// Fetch results
// ---------------------------------------------------------------------------

/// Table a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    KbKnowledgeBase,
    KbCategory,
    KbKnowledge,
}

impl Table {
    /// ServiceNow table name.
    pub fn name(self) -> &'static str {
        match self {
            Self::KbKnowledgeBase => "kb_knowledge_base",
            Self::KbCategory => "kb_category",
            Self::KbKnowledge => "kb_knowledge",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A row that failed validation at the fetch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub table: Table,
    /// Identifier, when the row had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_id: Option<String>,
    pub reason: String,
}

/// One fully paginated collection: valid records plus the rows we rejected.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub records: Vec<T>,
    pub rejected: Vec<RejectedRecord>,
}

impl<T> Default for Fetched<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// The three collections of one run, fully materialized.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub knowledge_bases: Vec<KnowledgeBase>,
    pub categories: Vec<Category>,
    pub articles: Vec<Article>,
    /// Rows rejected across all three tables.
    pub rejected: Vec<RejectedRecord>,
}

impl Catalog {
    /// Assemble a catalog from three fetched collections.
    pub fn from_fetched(
        knowledge_bases: Fetched<KnowledgeBase>,
        categories: Fetched<Category>,
        articles: Fetched<Article>,
    ) -> Self {
        let mut rejected = knowledge_bases.rejected;
        rejected.extend(categories.rejected);
        rejected.extend(articles.rejected);

        Self {
            knowledge_bases: knowledge_bases.records,
            categories: categories.records,
            articles: articles.records,
            rejected,
        }
    }
}

// ---------------------------------------------------------------------------
// AllowList
// ---------------------------------------------------------------------------

/// Knowledge-base display names to export. Empty means "all of them".
///
/// Matching is case-sensitive on the name with runs of whitespace collapsed
/// to one space, the same normalization knowledge-base titles get on fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(BTreeSet<String>);

impl AllowList {
    /// Build from any list of names; blanks are ignored.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            names
                .into_iter()
                .map(|n| normalize_name(n.as_ref()))
                .filter(|n| !n.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated list (`SERVICENOW_KNOWLEDGE_BASES`).
    pub fn parse(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a knowledge base with this display name is selected.
    pub fn allows(&self, name: &str) -> bool {
        self.0.is_empty() || self.0.contains(&normalize_name(name))
    }

    /// Allow-listed names that match none of `present`.
    pub fn unmatched<'a, I>(&self, present: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present: BTreeSet<String> = present.into_iter().map(normalize_name).collect();
        self.0
            .iter()
            .filter(|name| !present.contains(*name))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}
