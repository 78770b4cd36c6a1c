//! Text utilities for console reporting and log inspection.
//!
//! Build-tool output arrives contaminated with ANSI escape sequences, so
//! every measurement here (padding, wrapping, counting) works on the
//! printable text after stripping.

use regex::Regex;

/// Default filler character for [`pad_to_width`].
pub const DEFAULT_FILLER: char = '.';

/// Remove ANSI escape sequences from `text`.
///
/// Pattern classes are applied in a fixed order so broader patterns never
/// consume terminators belonging to narrower ones: CSI sequences with
/// parameters first, then charset designations, OSC sequences, residual
/// bracketed sequences, string-terminated sequences (DCS/SOS/PM/APC), and
/// finally any leftover `ESC <letter>` pair. Idempotent.
pub fn strip_ansi(text: &str) -> String {
    let passes = [
        // CSI with parameter and intermediate bytes, e.g. `ESC[1;31m`.
        r"\x1b\[[0-9;:?<=>]*[ -/]*[@-~]",
        // Charset designation, e.g. `ESC(B`.
        r"\x1b[()][0-9A-B]",
        // Operating system command, terminated by BEL or ST.
        r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?",
        // Residual bracketed sequences with unusual parameter bytes.
        r"\x1b\[[^@-~]*[@-~]",
        // String-terminated sequences: DCS, SOS, PM, APC up to ST.
        r"\x1b[PX^_][^\x1b]*\x1b\\",
        // Anything left that looks like `ESC <letter>`.
        r"\x1b[A-Za-z]",
    ];
    let mut cleaned = text.to_string();
    for pattern in passes {
        let re = Regex::new(pattern).expect("regex for ansi escape class");
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    cleaned
}

/// Count case-sensitive occurrences of `word` in ANSI-stripped `text`.
///
/// Returns 0 for empty input or an empty needle; never fails.
pub fn count_occurrences(text: &str, word: &str) -> usize {
    if text.is_empty() || word.is_empty() {
        return 0;
    }
    strip_ansi(text).matches(word).count()
}

/// Pad `text` with `.` until its printable length reaches `width`.
pub fn pad_to_width(text: &str, width: usize) -> String {
    pad_to_width_with(text, width, DEFAULT_FILLER)
}

/// Pad `text` with `filler` until its printable length reaches `width`.
///
/// The printable length is measured on the ANSI-stripped text so colored
/// prefixes still line up. Text already at or past `width` is returned
/// unchanged: the filler count clamps to zero, never truncates.
pub fn pad_to_width_with(text: &str, width: usize, filler: char) -> String {
    let printable = strip_ansi(text).chars().count();
    let missing = width.saturating_sub(printable);
    let mut padded = text.to_string();
    for _ in 0..missing {
        padded.push(filler);
    }
    padded
}

/// Split `text` into lines of at most `width` printable characters.
///
/// Input line boundaries are preserved; each line is chunked independently
/// after ANSI stripping. An empty input line yields one empty output line.
pub fn wrap_by_width(text: &str, width: usize) -> Vec<String> {
    let mut wrapped = Vec::new();
    if width == 0 {
        return wrapped;
    }
    for line in text.lines() {
        let stripped = strip_ansi(line);
        if stripped.is_empty() {
            wrapped.push(String::new());
            continue;
        }
        let chars: Vec<char> = stripped.chars().collect();
        for chunk in chars.chunks(width) {
            wrapped.push(chunk.iter().collect());
        }
    }
    wrapped
}

/// Return the last `n` lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}
