//! Trim preprocessing: rewrites raw source per a trim-mode policy while
//! tracking which original line each rewritten line begins on.
//!
//! Trimming never reorders lines; it only removes newline characters
//! adjacent to qualifying tags or line markers. Because a removed newline
//! merges two source lines, the preprocessor returns a line-origin table so
//! the code generator can still attribute every fragment to its original
//! source line.

use crate::error::Error;

/// Recognized trim modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum TrimMode {
    /// No trimming.
    #[default]
    None,
    /// `-`: a tag closed with `-%>` strips the newline that follows it.
    StripNewline,
    /// `%`: a line whose first non-space character is `%` becomes a bare
    /// statement, with marker and trailing newline removed.
    LineStatement,
}

impl TrimMode {
    /// Parse the `trim` option value. Unknown values are a configuration
    /// error, fatal at template construction.
    pub(crate) fn parse(option: Option<&str>) -> Result<Self, Error> {
        match option {
            None => Ok(Self::None),
            Some("-") => Ok(Self::StripNewline),
            Some("%") => Ok(Self::LineStatement),
            Some(other) => Err(Error::configuration(format!(
                "invalid trim mode {other:?} (expected \"-\" or \"%\")"
            ))),
        }
    }
}

/// Rewritten source plus line bookkeeping.
#[derive(Debug)]
pub(crate) struct Preprocessed {
    pub source: String,
    /// `line_origin[i]` is the 1-based original line on which rewritten
    /// line `i + 1` begins.
    pub line_origin: Vec<u32>,
}

impl Preprocessed {
    /// Original line for a 1-based rewritten line.
    pub(crate) fn original_line(&self, rewritten: u32) -> u32 {
        self.line_origin
            .get(rewritten.saturating_sub(1) as usize)
            .copied()
            .unwrap_or_else(|| self.line_origin.last().copied().unwrap_or(1))
    }
}

/// Accumulates rewritten text and records the original line each rewritten
/// line starts on.
struct Rewriter {
    out: String,
    line_origin: Vec<u32>,
}

impl Rewriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            line_origin: Vec::new(),
        }
    }

    fn push_str(&mut self, text: &str, start_origin: u32) {
        let mut origin = start_origin;
        for ch in text.chars() {
            if self.out.is_empty() || self.out.ends_with('\n') {
                self.line_origin.push(origin);
            }
            self.out.push(ch);
            if ch == '\n' {
                origin += 1;
            }
        }
    }

    fn finish(mut self) -> Preprocessed {
        if self.line_origin.is_empty() {
            self.line_origin.push(1);
        }
        Preprocessed {
            source: self.out,
            line_origin: self.line_origin,
        }
    }
}

/// Apply a trim mode to raw template source.
pub(crate) fn preprocess(source: &str, mode: TrimMode) -> Preprocessed {
    match mode {
        TrimMode::None => identity(source),
        TrimMode::StripNewline => strip_newline(source),
        TrimMode::LineStatement => line_statement(source),
    }
}

fn identity(source: &str) -> Preprocessed {
    let lines = source.split('\n').count() as u32;
    Preprocessed {
        source: source.to_string(),
        line_origin: (1..=lines.max(1)).collect(),
    }
}

/// `-` mode: a tag closed with `-%>` has the dash rewritten away and the
/// newline immediately after the tag dropped. A `-%>` in literal text (not
/// closing an open tag) is left alone.
fn strip_newline(source: &str) -> Preprocessed {
    let mut rw = Rewriter::new();
    let mut rest = source;
    let mut line = 1u32;
    while let Some(open) = rest.find("<%") {
        let Some(off) = rest[open + 2..].find("%>") else {
            break; // unclosed tag, copied verbatim below
        };
        let close = open + 2 + off;
        let dashed = close > open + 2 && rest.as_bytes()[close - 1] == b'-';
        if dashed {
            let head = &rest[..close - 1];
            rw.push_str(head, line);
            line += head.matches('\n').count() as u32;
            rw.push_str("%>", line);
            rest = &rest[close + 2..];
            if let Some(stripped) = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) {
                rest = stripped;
                line += 1;
            }
        } else {
            let head = &rest[..close + 2];
            rw.push_str(head, line);
            line += head.matches('\n').count() as u32;
            rest = &rest[close + 2..];
        }
    }
    rw.push_str(rest, line);
    rw.finish()
}

/// `%` mode: a line starting (after indentation) with `%` becomes a bare
/// statement tag with its trailing newline consumed; `%%` escapes a literal
/// leading `%`.
fn line_statement(source: &str) -> Preprocessed {
    let mut rw = Rewriter::new();
    let ends_with_newline = source.ends_with('\n');
    let lines: Vec<&str> = source.split('\n').collect();
    // split('\n') on "a\n" yields ["a", ""]; the trailing slot is not a line.
    let line_count = if ends_with_newline {
        lines.len() - 1
    } else {
        lines.len()
    };

    for (i, raw) in lines.iter().take(line_count).enumerate() {
        let origin = (i + 1) as u32;
        let trimmed = raw.trim_start();
        if let Some(escaped) = trimmed.strip_prefix("%%") {
            // Literal line beginning with a single `%`.
            rw.push_str(&format!("%{escaped}"), origin);
            if i + 1 < line_count || ends_with_newline {
                rw.push_str("\n", origin);
            }
        } else if let Some(code) = trimmed.strip_prefix('%') {
            // Whole-line statement: marker and trailing newline removed.
            rw.push_str(&format!("<% {} %>", code.trim()), origin);
        } else {
            rw.push_str(raw, origin);
            if i + 1 < line_count || ends_with_newline {
                rw.push_str("\n", origin);
            }
        }
    }
    rw.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trim_modes() {
        assert_eq!(TrimMode::parse(None).unwrap(), TrimMode::None);
        assert_eq!(TrimMode::parse(Some("-")).unwrap(), TrimMode::StripNewline);
        assert_eq!(TrimMode::parse(Some("%")).unwrap(), TrimMode::LineStatement);
        assert!(matches!(
            TrimMode::parse(Some("=")),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_identity_preserves_lines() {
        let pre = preprocess("a\nb\nc", TrimMode::None);
        assert_eq!(pre.source, "a\nb\nc");
        assert_eq!(pre.line_origin, vec![1, 2, 3]);
    }

    #[test]
    fn test_strip_newline_mode() {
        let pre = preprocess("\n<%= 1 + 1 -%>\n", TrimMode::StripNewline);
        assert_eq!(pre.source, "\n<%= 1 + 1 %>");
        assert_eq!(pre.original_line(2), 2);
    }

    #[test]
    fn test_strip_newline_leaves_plain_tags() {
        let pre = preprocess("<%= a %>\nx\n", TrimMode::StripNewline);
        assert_eq!(pre.source, "<%= a %>\nx\n");
    }

    #[test]
    fn test_strip_newline_leaves_literal_marker_text() {
        // A `-%>` outside any tag is plain text; only tag closers qualify.
        let pre = preprocess("a -%> b\n<%= 1 -%>\nx", TrimMode::StripNewline);
        assert_eq!(pre.source, "a -%> b\n<%= 1 %>x");
        assert_eq!(pre.original_line(2), 2);
    }

    #[test]
    fn test_line_statement_mode() {
        let pre = preprocess("\n% if true\nhello\n%end\n", TrimMode::LineStatement);
        assert_eq!(pre.source, "\n<% if true %>hello\n<% end %>");
        // The `%end` line landed on rewritten line 3 and came from line 4.
        assert_eq!(pre.original_line(3), 4);
    }

    #[test]
    fn test_line_statement_escape() {
        let pre = preprocess("%% literal\n", TrimMode::LineStatement);
        assert_eq!(pre.source, "% literal\n");
    }

    #[test]
    fn test_line_statement_ignores_mid_line_percent() {
        let pre = preprocess("100% done\n", TrimMode::LineStatement);
        assert_eq!(pre.source, "100% done\n");
    }
}
