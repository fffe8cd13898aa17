//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Passes that rewrite prose leave fenced code blocks untouched.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.to_string();

    result = demote_headings(&result);
    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = resolve_links(&result, base_url);
    result = normalize_whitespace(&result);
    result = collapse_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

/// Apply `f` to every line outside fenced code blocks.
fn map_prose_lines(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut in_code_block = false;

    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                f(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 1: Demote headings
// ---------------------------------------------------------------------------

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"));

/// Shift every heading down one level when the body contains an H1.
///
/// The article title is the document's only H1.
fn demote_headings(md: &str) -> String {
    let mut in_code_block = false;
    let has_h1 = md.lines().any(|line| {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            return false;
        }
        !in_code_block && HEADING_RE.captures(line).is_some_and(|caps| &caps[1] == "#")
    });

    if !has_h1 {
        return md.to_string();
    }

    map_prose_lines(md, |line| match HEADING_RE.captures(line) {
        Some(caps) => {
            let level = (caps[1].len() + 1).min(6);
            format!("{} {}", "#".repeat(level), &caps[2])
        }
        None => line.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Pass 2: Fix code block language hints
// ---------------------------------------------------------------------------

/// Detect and fix code block language hints from class names.
///
/// Handles patterns like `language-js`, `lang-python`, `highlight-rust`.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove stray layout tags that survived the conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|font|center|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>").expect("valid regex")
    });

    map_prose_lines(md, |line| HTML_TAG_RE.replace_all(line, "").to_string())
}

// ---------------------------------------------------------------------------
// Pass 4: Resolve relative links
// ---------------------------------------------------------------------------

/// Resolve relative link and image targets against the instance URL.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    map_prose_lines(md, |line| {
        LINK_RE
            .replace_all(line, |caps: &regex::Captures| {
                let text = &caps[1];
                let href = &caps[2];

                if is_absolute_or_anchor(href) {
                    return caps[0].to_string();
                }

                match base.join(href) {
                    Ok(resolved) => format!("[{text}]({resolved})"),
                    Err(_) => caps[0].to_string(),
                }
            })
            .to_string()
    })
}

fn is_absolute_or_anchor(href: &str) -> bool {
    href.starts_with('#')
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
        || Url::parse(href).is_ok()
}

// ---------------------------------------------------------------------------
// Pass 5: Normalize whitespace
// ---------------------------------------------------------------------------

/// Strip trailing whitespace from every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 6: Collapse blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines outside code blocks into one.
fn collapse_blank_lines(md: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
        }
        let blank = line.trim().is_empty();
        if blank && !in_code_block && out.last().is_none_or(|prev| prev.trim().is_empty()) {
            continue;
        }
        out.push(line);
    }

    out.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 7: Ensure trailing newline
// ---------------------------------------------------------------------------

/// End with exactly one newline; an empty body stays empty.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demote_headings_shifts_levels_when_h1_present() {
        let input = "# Title\n\nSome text\n\n## Sub\n\n###### Deep";
        let result = demote_headings(input);
        assert_eq!(result, "## Title\n\nSome text\n\n### Sub\n\n###### Deep");
    }

    #[test]
    fn demote_headings_leaves_bodies_without_h1() {
        let input = "## Sub\n\n### Deep";
        assert_eq!(demote_headings(input), input);
    }

    #[test]
    fn demote_headings_ignores_code_comments() {
        let input = "```bash\n# not a heading\n```\n\n## Sub";
        assert_eq!(demote_headings(input), input);
    }

    #[test]
    fn collapse_blank_lines_leaves_single_blank() {
        let input = "Line 1\n\n\n\n\nLine 2\n\nLine 3";
        assert_eq!(collapse_blank_lines(input), "Line 1\n\nLine 2\n\nLine 3");
    }

    #[test]
    fn collapse_blank_lines_drops_leading_blanks() {
        assert_eq!(collapse_blank_lines("\n\nText"), "Text");
    }

    #[test]
    fn collapse_blank_lines_preserves_code_blocks() {
        let input = "```\na\n\n\nb\n```";
        assert_eq!(collapse_blank_lines(input), input);
    }

    #[test]
    fn fix_code_block_languages_strips_prefix() {
        let input = "```language-javascript\nconsole.log('hi');\n```";
        let result = fix_code_block_languages(input);
        assert!(result.starts_with("```javascript"));
    }

    #[test]
    fn strip_leftover_html_removes_layout_tags() {
        let input = "<div class=\"note\"><font color=\"red\">Important</font> info</div>";
        assert_eq!(strip_leftover_html(input), "Important info");
    }

    #[test]
    fn strip_leftover_html_preserves_code_blocks() {
        let input = "```html\n<div>Preserved</div>\n```";
        assert_eq!(strip_leftover_html(input), input);
    }

    #[test]
    fn resolve_links_relative_resolved() {
        let base = Url::parse("https://acme.service-now.com/").unwrap();
        let result = resolve_links("[Next](kb_view.do?sys_kb_id=abc)", Some(&base));
        assert_eq!(
            result,
            "[Next](https://acme.service-now.com/kb_view.do?sys_kb_id=abc)"
        );
    }

    #[test]
    fn resolve_links_covers_images() {
        let base = Url::parse("https://acme.service-now.com/").unwrap();
        let result = resolve_links("![shot](/sys_attachment.do?sys_id=1)", Some(&base));
        assert_eq!(
            result,
            "![shot](https://acme.service-now.com/sys_attachment.do?sys_id=1)"
        );
    }

    #[test]
    fn resolve_links_leaves_absolute_and_anchors() {
        let base = Url::parse("https://acme.service-now.com/").unwrap();
        for input in [
            "[Link](https://other.com/page)",
            "[Section](#section-1)",
            "[Mail](mailto:help@acme.com)",
        ] {
            assert_eq!(resolve_links(input, Some(&base)), input);
        }
    }

    #[test]
    fn resolve_links_without_base_is_noop() {
        assert_eq!(resolve_links("[a](/b)", None), "[a](/b)");
    }

    #[test]
    fn ensure_trailing_newline_normalizes() {
        assert_eq!(ensure_trailing_newline("Content"), "Content\n");
        assert_eq!(ensure_trailing_newline("Content\n\n\n"), "Content\n");
        assert_eq!(ensure_trailing_newline("\n\n"), "");
    }

    #[test]
    fn full_pipeline_cleans_markdown() {
        let input = "# Title\n\n\n\n\n\n## Section\n\n<div>Some content</div>   \n\n```language-python\nprint('hi')\n```\n\nEnd\n\n\n";
        let base = Url::parse("https://example.com/").unwrap();
        let result = run_pipeline(input, Some(&base));

        assert_eq!(
            result,
            "## Title\n\n### Section\n\nSome content\n\n```python\nprint('hi')\n```\n\nEnd\n"
        );
    }
}
