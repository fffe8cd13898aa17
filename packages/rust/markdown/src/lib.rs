//! HTML-to-Markdown rendering for article bodies.
//!
//! Converts an article's HTML body to clean Markdown using the `htmd` crate,
//! then applies a series of cleanup passes to normalize headings, blank lines,
//! code blocks, and links. Rendering never fails: if `htmd` rejects the input
//! we fall back to the body's plain text and flag the result as degraded.

mod cleanup;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

/// Tags whose content never belongs in the rendered body.
const SKIP_TAGS: [&str; 6] = ["script", "style", "iframe", "noscript", "svg", "head"];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for rendering one article body.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Base for resolving relative links and images (the instance URL).
    pub base_url: Option<Url>,
}

/// Result of rendering an HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Markdown body. Empty, or ending in exactly one newline.
    pub markdown: String,
    /// True when conversion failed and `markdown` is plain text.
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Render an HTML body as Markdown.
///
/// 1. Lift `<table>` elements out into Markdown pipe tables
/// 2. Convert HTML → Markdown via `htmd`
/// 3. Put the tables back
/// 4. Run the cleanup pipeline
///
/// Strong emphasis renders as `**text**`.
#[instrument(skip_all, fields(html_len = html.len()))]
pub fn render(html: &str, opts: &RenderOptions) -> Rendered {
    if html.trim().is_empty() {
        return Rendered {
            markdown: String::new(),
            degraded: false,
        };
    }

    let (content_html, tables) = extract_tables(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let (raw_markdown, degraded) = match converter.convert(&content_html) {
        Ok(md) => (restore_tables(&md, &tables), false),
        Err(e) => {
            warn!(error = %e, "htmd conversion failed, falling back to plain text");
            (plain_text(html), true)
        }
    };

    debug!(raw_len = raw_markdown.len(), tables = tables.len(), "htmd conversion complete");

    let markdown = cleanup::run_pipeline(&raw_markdown, opts.base_url.as_ref());

    Rendered { markdown, degraded }
}

// ---------------------------------------------------------------------------
// Table handling
// ---------------------------------------------------------------------------

/// Placeholder paragraph text standing in for table `i` during conversion.
fn table_token(i: usize) -> String {
    format!("KBMIRRORTABLE{i}END")
}

/// Replace every top-level `<table>` with a placeholder paragraph.
///
/// `htmd` 0.1 doesn't convert tables, so we render them ourselves and splice
/// them back in after conversion. Returns the rewritten HTML and the Markdown
/// for each table, indexed by placeholder.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    let doc = Html::parse_fragment(html);
    let table_sel = Selector::parse("table").expect("valid selector");

    let top_level: Vec<ElementRef> = doc
        .select(&table_sel)
        .filter(|table| {
            !table
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| a.value().name() == "table")
        })
        .collect();

    if top_level.is_empty() {
        return (html.to_string(), Vec::new());
    }

    // Serialize through the same parser so each table's HTML is an exact substring.
    let mut result = doc.root_element().inner_html();
    let mut tables = Vec::with_capacity(top_level.len());

    for (i, table) in top_level.iter().enumerate() {
        let placeholder = format!("<p>{}</p>", table_token(i));
        result = result.replacen(&table.html(), &placeholder, 1);
        tables.push(html_table_to_markdown(table));
    }

    (result, tables)
}

/// Swap placeholders back for their Markdown tables.
fn restore_tables(md: &str, tables: &[String]) -> String {
    tables
        .iter()
        .enumerate()
        .fold(md.to_string(), |acc, (i, table)| {
            acc.replace(&table_token(i), table)
        })
}

/// Convert a single HTML table element to a Markdown table string.
///
/// The first row becomes the header row.
fn html_table_to_markdown(table: &ElementRef) -> String {
    let tr_sel = Selector::parse("tr").expect("valid selector");
    let cell_sel = Selector::parse("th, td").expect("valid selector");

    let mut rows: Vec<Vec<String>> = table
        .select(&tr_sel)
        .map(|tr| {
            tr.select(&cell_sel)
                .map(|cell| table_cell_text(&cell))
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let line = |cells: &[String]| format!("| {} |", cells.join(" | "));
    let separator = vec!["---".to_string(); col_count];

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(line(&rows[0]));
    lines.push(line(&separator));
    lines.extend(rows[1..].iter().map(|row| line(row)));

    lines.join("\n")
}

/// Cell text on one line, with pipes escaped.
fn table_cell_text(cell: &ElementRef) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// Best-effort plain text of an HTML fragment, one block per line.
fn plain_text(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let skip: Vec<Selector> = SKIP_TAGS
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .collect();
    let skipped: Vec<_> = skip
        .iter()
        .flat_map(|sel| doc.select(sel).map(|el| el.id()))
        .collect();

    let mut out = String::new();
    for node in doc.root_element().descendants() {
        if node.ancestors().any(|a| skipped.contains(&a.id())) {
            continue;
        }
        if let Some(text) = node.value().as_text() {
            let words = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !words.is_empty() {
                out.push_str(&words);
                out.push('\n');
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
