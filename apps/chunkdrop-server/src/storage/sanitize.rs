//! Filename sanitization
//!
//! Turns any client-supplied name into a single path segment that is safe to
//! join onto a storage root. The function never fails: hostile input degrades
//! to a placeholder instead of an error.

/// Name used when nothing usable survives sanitization
pub const PLACEHOLDER_NAME: &str = "unnamed_file";

/// Longest name most filesystems accept for one path segment
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Room left for the `.chunk{index}` suffix of chunk artifacts (`.chunk9999`).
/// Covers every index allowed by `upload::MAX_CHUNKS`.
pub const CHUNK_SUFFIX_RESERVE: usize = 10;

/// Longest name produced by [`sanitize`]
pub const MAX_STORED_NAME_LENGTH: usize = MAX_FILENAME_LENGTH - CHUNK_SUFFIX_RESERVE;

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Derive a safe on-disk basename from an arbitrary name.
///
/// Rules, in order:
/// 1. keep only the last path segment (both `/` and `\` separate segments)
/// 2. replace `< > : " / \ | ? *` and control bytes with `_`
/// 3. trim leading/trailing dots and spaces
/// 4. prefix reserved device names (`CON`, `COM1`, ...) with `file_`
/// 5. substitute [`PLACEHOLDER_NAME`] for empty, `.` and `..`
/// 6. shorten the stem so the result fits [`MAX_STORED_NAME_LENGTH`] bytes,
///    keeping the extension intact
pub fn sanitize(raw: &str) -> String {
    let last_segment = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let replaced: String = last_segment
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();

    let mut name = replaced.trim_matches(|c| c == '.' || c == ' ').to_string();

    if is_reserved_device_name(&name) {
        name = format!("file_{}", name);
    }

    if name.is_empty() || name == "." || name == ".." {
        name = PLACEHOLDER_NAME.to_string();
    }

    truncate_preserving_extension(name)
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || (c as u32) < 0x20
}

fn is_reserved_device_name(name: &str) -> bool {
    RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

fn truncate_preserving_extension(name: String) -> String {
    if name.len() <= MAX_STORED_NAME_LENGTH {
        return name;
    }

    let (stem, extension) = split_extension(&name);

    // A pathological "extension" gets no special treatment
    if extension.len() >= MAX_STORED_NAME_LENGTH / 2 {
        return truncate_at_char_boundary(&name, MAX_STORED_NAME_LENGTH).to_string();
    }

    let stem = truncate_at_char_boundary(stem, MAX_STORED_NAME_LENGTH - extension.len());
    format!("{}{}", stem, extension)
}

/// Split `name` into stem and extension (the extension keeps its dot).
///
/// A leading dot does not start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_is_unchanged() {
        assert_eq!(sanitize("report.pdf"), "report.pdf");
        assert_eq!(sanitize("my file (1).tar.gz"), "my file (1).tar.gz");
    }

    #[test]
    fn test_directory_components_are_stripped() {
        assert_eq!(sanitize("../../etc/passwd"), "passwd");
        assert_eq!(sanitize("/absolute/path/to/file.txt"), "file.txt");
        assert_eq!(sanitize("C:\\Windows\\system32\\drivers.sys"), "drivers.sys");
        assert_eq!(sanitize("..\\..\\boot.ini"), "boot.ini");
    }

    #[test]
    fn test_forbidden_characters_are_replaced() {
        assert_eq!(sanitize("a<b>c:d\"e|f?g*h"), "a_b_c_d_e_f_g_h");
        assert_eq!(sanitize("tab\there\u{0}nul"), "tab_here_nul");
    }

    #[test]
    fn test_dots_and_spaces_are_trimmed() {
        assert_eq!(sanitize("  ..hidden.txt.. "), "hidden.txt");
        assert_eq!(sanitize(".bashrc"), "bashrc");
    }

    #[test]
    fn test_reserved_device_names_are_prefixed() {
        assert_eq!(sanitize("CON"), "file_CON");
        assert_eq!(sanitize("nul"), "file_nul");
        assert_eq!(sanitize("Com7"), "file_Com7");
        assert_eq!(sanitize("lpt9"), "file_lpt9");
        // Only exact matches are reserved
        assert_eq!(sanitize("CON.txt"), "CON.txt");
        assert_eq!(sanitize("COM10"), "COM10");
    }

    #[test]
    fn test_degenerate_names_get_placeholder() {
        for raw in ["", ".", "..", "...", "   ", "/", "foo/", "a/b/..", "\\"] {
            assert_eq!(sanitize(raw), PLACEHOLDER_NAME, "raw name {:?}", raw);
        }
    }

    #[test]
    fn test_long_name_keeps_extension() {
        let raw = format!("{}.pdf", "a".repeat(400));
        let safe = sanitize(&raw);

        assert_eq!(safe.len(), MAX_STORED_NAME_LENGTH);
        assert!(safe.ends_with(".pdf"));
        assert!(safe.starts_with("aaaa"));
    }

    #[test]
    fn test_long_multibyte_name_stays_on_char_boundary() {
        let raw = format!("{}.txt", "é".repeat(300));
        let safe = sanitize(&raw);

        assert!(safe.len() <= MAX_STORED_NAME_LENGTH);
        assert!(safe.ends_with(".txt"));
    }

    #[test]
    fn test_output_is_never_empty_and_has_no_separators() {
        let hostile = [
            "../../../../../../etc/shadow",
            "..",
            "/",
            "\0",
            "..\\..\\..",
            "CON",
            "a/../../b",
            "\u{1b}[31m",
        ];
        for raw in hostile {
            let safe = sanitize(raw);
            assert!(!safe.is_empty());
            assert!(!safe.contains('/'));
            assert!(!safe.contains('\\'));
            assert_ne!(safe, "..");
            assert_ne!(safe, ".");
        }
    }
}
