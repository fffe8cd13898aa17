//! Display names → filesystem-safe path segments.

/// Longest segment we emit, in characters.
pub const MAX_SEGMENT_CHARS: usize = 100;

/// Segment used when sanitizing leaves nothing behind.
pub const FALLBACK_SEGMENT: &str = "unnamed";

const FORBIDDEN: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Turn a display name into a single path segment.
///
/// Idempotent: sanitizing a sanitized segment returns it unchanged.
///
/// ```
/// use kbmirror_core::sanitize::sanitize_segment;
///
/// assert_eq!(sanitize_segment("What is Spam?"), "What-is-Spam");
/// assert_eq!(sanitize_segment("  "), "unnamed");
/// ```
pub fn sanitize_segment(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) {
                '_'
            } else if c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let dashed = replaced.split_whitespace().collect::<Vec<_>>().join("-");
    let mut segment = truncate(trim_edges(&dashed), MAX_SEGMENT_CHARS);

    // Checked after truncation: trimming a cut name can expose a device name.
    if is_reserved(&segment) {
        segment = format!("_{}", truncate(&segment, MAX_SEGMENT_CHARS - 1));
    }

    if segment.is_empty() {
        FALLBACK_SEGMENT.to_string()
    } else {
        segment
    }
}

/// Cut to `max` chars, then re-trim the new edge.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    trim_edges(&cut).to_string()
}

/// No leading dots (hidden files, `.`/`..`), no trailing separators or dots.
fn trim_edges(s: &str) -> &str {
    s.trim_start_matches('.').trim_end_matches(['_', '-', '.'])
}

/// Windows device names, with or without an extension.
fn is_reserved(segment: &str) -> bool {
    let stem = segment.split('.').next().unwrap_or(segment);
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_become_dashes() {
        assert_eq!(sanitize_segment("What is Spam"), "What-is-Spam");
        assert_eq!(sanitize_segment("  lots   of\tspace \n"), "lots-of-space");
    }

    #[test]
    fn forbidden_characters_are_replaced() {
        assert_eq!(sanitize_segment("a<b>c:d\"e/f\\g|h?i*j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_segment("How to: reset"), "How-to_-reset");
    }

    #[test]
    fn control_characters_become_separators() {
        assert_eq!(sanitize_segment("line\u{0}one\u{7}two"), "line-one-two");
    }

    #[test]
    fn edges_are_trimmed() {
        assert_eq!(sanitize_segment("..hidden"), "hidden");
        assert_eq!(sanitize_segment("Why?"), "Why");
        assert_eq!(sanitize_segment("trailing - "), "trailing");
        assert_eq!(sanitize_segment("dots..."), "dots");
        assert_eq!(sanitize_segment(".."), FALLBACK_SEGMENT);
    }

    #[test]
    fn empty_input_falls_back() {
        assert_eq!(sanitize_segment(""), FALLBACK_SEGMENT);
        assert_eq!(sanitize_segment("???"), FALLBACK_SEGMENT);
    }

    #[test]
    fn reserved_device_names_are_prefixed() {
        assert_eq!(sanitize_segment("CON"), "_CON");
        assert_eq!(sanitize_segment("nul"), "_nul");
        assert_eq!(sanitize_segment("com1.txt"), "_com1.txt");
        assert_eq!(sanitize_segment("CONSOLE"), "CONSOLE");
    }

    #[test]
    fn truncation_never_exposes_device_name() {
        let out = sanitize_segment(&format!("CON{}x", "?".repeat(98)));
        assert_eq!(out, "_CON");

        let long_ext = sanitize_segment(&format!("CON.{}", "z".repeat(120)));
        assert!(long_ext.starts_with("_CON.z"));
        assert_eq!(long_ext.chars().count(), MAX_SEGMENT_CHARS);
    }

    #[test]
    fn long_names_are_truncated_on_char_boundary() {
        let long = "é".repeat(150);
        let out = sanitize_segment(&long);
        assert_eq!(out.chars().count(), MAX_SEGMENT_CHARS);

        let dashed = format!("{}-tail", "a".repeat(MAX_SEGMENT_CHARS - 1));
        assert_eq!(sanitize_segment(&dashed), "a".repeat(MAX_SEGMENT_CHARS - 1));
    }

    #[test]
    fn unicode_is_kept() {
        assert_eq!(sanitize_segment("Passwort zurücksetzen"), "Passwort-zurücksetzen");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "What is Spam",
            "  ..weird / name?? ",
            "CON",
            "com1.txt",
            "-_-",
            "a - b",
            "x\u{1}y",
            &"long title ".repeat(20),
            &format!("CON.{}", "z".repeat(120)),
            &format!("CON.{}", "z".repeat(96)),
            &format!("CON{}x", "?".repeat(98)),
            &format!("lpt1 {}", "- ".repeat(60)),
            "",
        ];
        for s in samples {
            let once = sanitize_segment(s);
            assert_eq!(sanitize_segment(&once), once, "input {s:?}");
        }
    }
}
