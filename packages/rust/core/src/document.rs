//! Article file contents: metadata header, title heading, rendered body.

use std::fmt::Write as _;

use kbmirror_shared::TIMESTAMP_FORMAT;

use crate::extract::OutputUnit;

/// Header field names, in the order they're written.
pub const HEADER_FIELDS: [&str; 10] = [
    "title",
    "author",
    "author_sys_id",
    "created_date",
    "updated_date",
    "views",
    "rating",
    "knowledge_base",
    "category",
    "sys_id",
];

/// Build the full file contents for one unit.
///
/// ```text
/// title: "What is Spam"
/// ...
/// sys_id: "a1"
///
/// # What is Spam
///
/// <body>
/// ```
///
/// The result always ends with exactly one newline.
pub fn build_document(unit: &OutputUnit<'_>, body_markdown: &str) -> String {
    let article = unit.article;
    let mut doc = String::with_capacity(body_markdown.len() + 512);

    for (field, value) in HEADER_FIELDS.iter().zip(header_values(unit)) {
        let _ = writeln!(doc, "{field}: {}", quote(&value));
    }

    let _ = write!(doc, "\n# {}\n", article.title);

    let body = strip_title_lines(body_markdown, &article.title).trim_end();
    if !body.is_empty() {
        doc.push('\n');
        doc.push_str(body);
        doc.push('\n');
    }

    doc
}

fn header_values(unit: &OutputUnit<'_>) -> [String; 10] {
    let article = unit.article;
    let author = article.author.as_ref();
    let timestamp = |t: Option<chrono::NaiveDateTime>| {
        t.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default()
    };

    [
        article.title.clone(),
        author.map(|a| a.name.clone()).unwrap_or_default(),
        author.map(|a| a.sys_id.clone()).unwrap_or_default(),
        timestamp(article.created),
        timestamp(article.updated),
        article.view_count.map(|v| v.to_string()).unwrap_or_default(),
        article.rating.clone().unwrap_or_default(),
        unit.knowledge_base.name.clone(),
        unit.category.map(|c| c.name.clone()).unwrap_or_default(),
        article.sys_id.clone(),
    ]
}

/// Double-quote a header value, escaping backslashes, quotes and line breaks.
fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\r', "\\r")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

/// Drop leading blank lines and lines that just repeat the title.
///
/// Bodies often open with the title as a heading or a plain paragraph;
/// the document already has it as its H1.
fn strip_title_lines<'b>(body: &'b str, title: &str) -> &'b str {
    let title = title.trim();
    let mut rest = body;

    while !rest.is_empty() {
        let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
        let text = line.trim();
        let heading_text = text.trim_start_matches('#').trim();
        let repeats_title = text == title || (text.starts_with('#') && heading_text == title);

        if text.is_empty() || repeats_title {
            rest = tail;
        } else {
            break;
        }
    }

    rest
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::NaiveDate;
    use kbmirror_shared::{Article, Author, Category, KnowledgeBase};

    use super::*;

    fn fixtures() -> (KnowledgeBase, Category, Article) {
        let kb = KnowledgeBase {
            sys_id: "kb1".into(),
            name: "IT".into(),
        };
        let category = Category {
            sys_id: "c1".into(),
            name: "Security".into(),
            knowledge_base: Some("kb1".into()),
            parent: None,
        };
        let article = Article {
            sys_id: "a1".into(),
            title: "What is Spam".into(),
            body_html: String::new(),
            category: Some("c1".into()),
            knowledge_base: None,
            author: Some(Author {
                sys_id: "u1".into(),
                name: "Ada Lovelace".into(),
            }),
            created: NaiveDate::from_ymd_opt(2024, 1, 2)
                .and_then(|d| d.and_hms_opt(3, 4, 5)),
            updated: None,
            view_count: Some(42),
            rating: Some("4.5".into()),
        };
        (kb, category, article)
    }

    fn unit<'a>(kb: &'a KnowledgeBase, c: Option<&'a Category>, a: &'a Article) -> OutputUnit<'a> {
        OutputUnit {
            path: PathBuf::from("IT/Security/What-is-Spam.md"),
            knowledge_base: kb,
            category: c,
            article: a,
        }
    }

    #[test]
    fn document_has_exact_layout() {
        let (kb, category, article) = fixtures();
        let doc = build_document(&unit(&kb, Some(&category), &article), "Spam is unwanted mail.\n");

        assert_eq!(
            doc,
            "title: \"What is Spam\"\n\
             author: \"Ada Lovelace\"\n\
             author_sys_id: \"u1\"\n\
             created_date: \"2024-01-02 03:04:05\"\n\
             updated_date: \"\"\n\
             views: \"42\"\n\
             rating: \"4.5\"\n\
             knowledge_base: \"IT\"\n\
             category: \"Security\"\n\
             sys_id: \"a1\"\n\
             \n\
             # What is Spam\n\
             \n\
             Spam is unwanted mail.\n"
        );
    }

    #[test]
    fn missing_values_render_empty() {
        let (kb, _, mut article) = fixtures();
        article.author = None;
        article.created = None;
        article.view_count = None;
        article.rating = None;

        let doc = build_document(&unit(&kb, None, &article), "Body\n");
        for field in ["author", "author_sys_id", "created_date", "views", "rating", "category"] {
            assert!(doc.contains(&format!("\n{field}: \"\"\n")), "{field} in {doc}");
        }
    }

    #[test]
    fn values_are_escaped() {
        let (kb, category, mut article) = fixtures();
        article.title = r#"Use "quotes" and C:\paths"#.into();

        let doc = build_document(&unit(&kb, Some(&category), &article), "");
        assert!(doc.starts_with("title: \"Use \\\"quotes\\\" and C:\\\\paths\"\n"), "{doc}");
        assert!(doc.ends_with("\n# Use \"quotes\" and C:\\paths\n"));
    }

    #[test]
    fn empty_body_ends_after_title() {
        let (kb, category, article) = fixtures();
        let doc = build_document(&unit(&kb, Some(&category), &article), "");
        assert!(doc.ends_with("sys_id: \"a1\"\n\n# What is Spam\n"));
    }

    #[test]
    fn leading_title_repeats_are_dropped() {
        let (kb, category, article) = fixtures();
        let body = "\n## What is Spam\n\nWhat is Spam\n\nSpam is unwanted mail.\n\nWhat is Spam\n";
        let doc = build_document(&unit(&kb, Some(&category), &article), body);

        assert!(doc.ends_with("# What is Spam\n\nSpam is unwanted mail.\n\nWhat is Spam\n"), "{doc}");
        assert_eq!(doc.matches("# What is Spam").count(), 1);
    }

    #[test]
    fn document_ends_with_single_newline() {
        let (kb, category, article) = fixtures();
        let doc = build_document(&unit(&kb, Some(&category), &article), "Text\n\n\n");
        assert!(doc.ends_with("Text\n"));
        assert!(!doc.ends_with("\n\n"));
    }
}
