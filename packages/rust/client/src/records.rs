//! Raw Table API rows and their validation into catalog records.
//!
//! Every row is decoded on its own so one bad row never fails a page.
//! Rows that decode but miss a required field are rejected with a reason.

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use kbmirror_shared::{Article, Author, Category, KnowledgeBase, TIMESTAMP_FORMAT, Table};

/// A raw row type that knows its table and how to validate itself.
pub(crate) trait TableRecord: DeserializeOwned {
    /// Validated record type.
    type Record;

    const TABLE: Table;

    /// Comma-separated `sysparm_fields`.
    const FIELDS: &'static str;

    fn sys_id(&self) -> Option<&str>;

    fn validate(self) -> Result<Self::Record, String>;
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// A reference column: a bare sys_id, or `{ "value": ..., "link": ... }`
/// when reference links are not excluded.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RefField {
    Plain(String),
    Link {
        value: String,
        #[serde(default)]
        #[allow(dead_code)]
        link: Option<String>,
    },
}

impl RefField {
    fn id(&self) -> Option<&str> {
        let raw = match self {
            Self::Plain(s) => s,
            Self::Link { value, .. } => value,
        };
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

fn ref_id(field: &Option<RefField>) -> Option<String> {
    field.as_ref().and_then(RefField::id).map(str::to_string)
}

/// Accept strings, numbers, booleans, or null for a scalar column.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_timestamp(raw: &str, field: &str) -> Option<NaiveDateTime> {
    let raw = non_blank(raw)?;
    match NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        Ok(ts) => Some(ts),
        Err(e) => {
            debug!(field, value = raw, error = %e, "unparseable timestamp, leaving empty");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// kb_knowledge_base
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RawKnowledgeBase {
    #[serde(default, deserialize_with = "lenient_string")]
    sys_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    title: String,
}

impl TableRecord for RawKnowledgeBase {
    type Record = KnowledgeBase;
    const TABLE: Table = Table::KbKnowledgeBase;
    const FIELDS: &'static str = "sys_id,title";

    fn sys_id(&self) -> Option<&str> {
        non_blank(&self.sys_id)
    }

    fn validate(self) -> Result<KnowledgeBase, String> {
        let sys_id = non_blank(&self.sys_id).ok_or("missing sys_id")?;
        let name = non_blank(&self.title).ok_or("missing title")?;
        Ok(KnowledgeBase {
            sys_id: sys_id.to_string(),
            name: collapse_whitespace(name),
        })
    }
}

// ---------------------------------------------------------------------------
// kb_category
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RawCategory {
    #[serde(default, deserialize_with = "lenient_string")]
    sys_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    label: String,
    #[serde(default)]
    kb_knowledge_base: Option<RefField>,
    #[serde(default)]
    parent_id: Option<RefField>,
    #[serde(default, deserialize_with = "lenient_string")]
    parent_table: String,
}

impl TableRecord for RawCategory {
    type Record = Category;
    const TABLE: Table = Table::KbCategory;
    const FIELDS: &'static str = "sys_id,label,kb_knowledge_base,parent_id,parent_table";

    fn sys_id(&self) -> Option<&str> {
        non_blank(&self.sys_id)
    }

    fn validate(self) -> Result<Category, String> {
        let sys_id = non_blank(&self.sys_id).ok_or("missing sys_id")?;
        let name = non_blank(&self.label).ok_or("missing label")?;

        // parent_id points at either the knowledge base or a parent category.
        let parent = ref_id(&self.parent_id);
        let (parent_kb, parent_category) = match self.parent_table.trim() {
            "kb_knowledge_base" => (parent, None),
            "kb_category" => (None, parent),
            _ => (None, None),
        };

        Ok(Category {
            sys_id: sys_id.to_string(),
            name: collapse_whitespace(name),
            knowledge_base: ref_id(&self.kb_knowledge_base).or(parent_kb),
            parent: parent_category.filter(|p| p != sys_id),
        })
    }
}

// ---------------------------------------------------------------------------
// kb_knowledge
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RawArticle {
    #[serde(default, deserialize_with = "lenient_string")]
    sys_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    short_description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    text: String,
    #[serde(default)]
    kb_category: Option<RefField>,
    #[serde(default)]
    kb_knowledge_base: Option<RefField>,
    #[serde(default)]
    author: Option<RefField>,
    #[serde(default, deserialize_with = "lenient_string")]
    sys_created_on: String,
    #[serde(default, deserialize_with = "lenient_string")]
    sys_updated_on: String,
    #[serde(default, alias = "view_count", deserialize_with = "lenient_string")]
    sys_view_count: String,
    #[serde(default, deserialize_with = "lenient_string")]
    rating: String,
}

impl TableRecord for RawArticle {
    type Record = Article;
    const TABLE: Table = Table::KbKnowledge;
    const FIELDS: &'static str = "sys_id,short_description,title,text,kb_category,kb_knowledge_base,\
                                  author,sys_created_on,sys_updated_on,sys_view_count,rating";

    fn sys_id(&self) -> Option<&str> {
        non_blank(&self.sys_id)
    }

    fn validate(self) -> Result<Article, String> {
        let sys_id = non_blank(&self.sys_id).ok_or("missing sys_id")?;
        let title = non_blank(&self.short_description)
            .or_else(|| non_blank(&self.title))
            .ok_or("missing short_description")?;

        Ok(Article {
            sys_id: sys_id.to_string(),
            title: collapse_whitespace(title),
            body_html: self.text,
            category: ref_id(&self.kb_category),
            knowledge_base: ref_id(&self.kb_knowledge_base),
            author: ref_id(&self.author).map(|sys_id| Author {
                sys_id,
                name: String::new(),
            }),
            created: parse_timestamp(&self.sys_created_on, "sys_created_on"),
            updated: parse_timestamp(&self.sys_updated_on, "sys_updated_on"),
            view_count: non_blank(&self.sys_view_count).and_then(|v| v.parse().ok()),
            rating: non_blank(&self.rating)
                .filter(|v| v.parse::<f64>().is_ok_and(f64::is_finite))
                .map(str::to_string),
        })
    }
}

// ---------------------------------------------------------------------------
// sys_user
// ---------------------------------------------------------------------------

/// The columns of `sys_user` we read for an author's display name.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawUser {
    #[serde(default, deserialize_with = "lenient_string")]
    first_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    last_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    name: String,
}

impl RawUser {
    pub(crate) const FIELDS: &'static str = "first_name,last_name,name";

    /// `first last`, falling back to the `name` column.
    pub(crate) fn display_name(&self) -> Option<String> {
        let full = collapse_whitespace(&format!("{} {}", self.first_name, self.last_name));
        if !full.is_empty() {
            return Some(full);
        }
        non_blank(&self.name).map(collapse_whitespace)
    }
}
