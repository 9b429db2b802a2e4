//! Code generation: transpiles preprocessed template source into a
//! procedure body in the engine's internal statement language, recording a
//! line map from generated lines back to original source lines.
//!
//! Three fragment kinds are recognized while scanning:
//!
//! - literal text — appended to the buffer as an escaped string literal;
//! - `<%= expr %>` — the expression's value is appended to the buffer;
//! - `<% stmt %>` — the fragment is embedded verbatim as control code.
//!
//! `<%# ... %>` comments are discarded (but still line-tracked) and `<%%`
//! escapes a literal `<%`. The generated body has the shape:
//!
//! ```text
//! @_erbout = ""
//! @_erbout << "literal"
//! @_erbout << (expr)
//! if cond
//! @_erbout << "more"
//! end
//! @_erbout
//! ```
//!
//! One generated line per fragment (statement fragments spanning several
//! source lines produce one generated line per source line), so the line map
//! stays a flat, monotonically non-decreasing pair list.

use std::sync::Arc;

use crate::trim::Preprocessed;

/// Ordered (generated line, original line) correspondence, produced once per
/// template at generation time.
#[derive(Debug, Default)]
pub struct LineMap {
    entries: Vec<(u32, u32)>,
}

impl LineMap {
    /// Original line for a generated line: the nearest entry at or before
    /// `generated`, or `None` if no entry precedes it.
    pub fn original_line(&self, generated: u32) -> Option<u32> {
        let idx = self.entries.partition_point(|&(gen, _)| gen <= generated);
        idx.checked_sub(1).map(|i| self.entries[i].1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, generated: u32, original: u32) {
        debug_assert!(
            self.entries.last().is_none_or(|&(gen, _)| gen <= generated),
            "line map entries must be non-decreasing"
        );
        self.entries.push((generated, original));
    }
}

/// Generated procedure body plus its line map.
#[derive(Debug)]
pub(crate) struct Generated {
    pub body: String,
    pub line_map: Arc<LineMap>,
}

/// Escape literal text so it survives as a one-line string literal in the
/// generated body.
fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Emission state while scanning fragments.
struct Emitter {
    body: String,
    line_map: LineMap,
    generated_line: u32,
    outvar: String,
}

impl Emitter {
    fn new(outvar: &str) -> Self {
        let mut emitter = Self {
            body: String::new(),
            line_map: LineMap::default(),
            generated_line: 0,
            outvar: outvar.to_string(),
        };
        emitter.raw_line(&format!("{outvar} = \"\""));
        emitter
    }

    /// Append a generated line with no line-map entry (header/footer).
    fn raw_line(&mut self, line: &str) {
        self.body.push_str(line);
        self.body.push('\n');
        self.generated_line += 1;
    }

    /// Append a generated line mapped to an original source line.
    fn mapped_line(&mut self, line: &str, original: u32) {
        self.raw_line(line);
        self.line_map.push(self.generated_line, original);
    }

    fn literal(&mut self, text: &str, original: u32) {
        if text.is_empty() {
            return;
        }
        let line = format!("{} << \"{}\"", self.outvar, escape_literal(text));
        self.mapped_line(&line, original);
    }

    fn expression(&mut self, fragment: &str, original: u32) {
        // Expressions may span source lines; fold them onto one line.
        let folded = fragment.replace(['\n', '\r'], " ");
        let line = format!("{} << ({})", self.outvar, folded.trim());
        self.mapped_line(&line, original);
    }

    fn statement(&mut self, fragment: &str, original: u32) {
        // Verbatim control code, one generated line per source line so the
        // map points inside multi-line fragments accurately.
        for (offset, piece) in fragment.split('\n').enumerate() {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            self.mapped_line(piece, original + offset as u32);
        }
    }

    fn finish(mut self, fallback_original: u32) -> Generated {
        if self.line_map.is_empty() {
            // A template with no content still maps its (empty) output to
            // the first source line.
            let outvar = self.outvar.clone();
            self.mapped_line(&format!("{outvar} << \"\""), fallback_original);
        }
        let outvar = self.outvar.clone();
        self.raw_line(&outvar);
        Generated {
            body: self.body,
            line_map: Arc::new(self.line_map),
        }
    }
}

/// Transpile preprocessed source into a generated body and line map.
pub(crate) fn generate(pre: &Preprocessed, outvar: &str) -> Generated {
    let mut emitter = Emitter::new(outvar);
    let src = pre.source.as_str();

    let mut literal = String::new();
    // Rewritten line on which the pending literal began.
    let mut literal_start = 1u32;
    let mut line = 1u32;
    let mut rest = src;

    while let Some(open) = rest.find("<%") {
        let (text, after) = rest.split_at(open);
        if literal.is_empty() && !text.is_empty() {
            literal_start = line;
        }
        literal.push_str(text);
        line += text.matches('\n').count() as u32;

        if let Some(after_escape) = after.strip_prefix("<%%") {
            // `<%%` emits a literal `<%` and scanning continues.
            if literal.is_empty() {
                literal_start = line;
            }
            literal.push_str("<%");
            rest = after_escape;
            continue;
        }

        if literal.is_empty() {
            literal_start = line;
        }
        emitter.literal(&literal, pre.original_line(literal_start));
        literal.clear();

        let tag_line = line;
        let inner = &after[2..];
        let (kind, inner) = match inner.as_bytes().first() {
            Some(b'=') => (TagKind::Expression, &inner[1..]),
            Some(b'#') => (TagKind::Comment, &inner[1..]),
            _ => (TagKind::Statement, inner),
        };
        // An unclosed tag swallows the rest of the source; the compiler will
        // reject the fragment if it is not a complete statement.
        let (fragment, after_tag) = match inner.find("%>") {
            Some(close) => (&inner[..close], &inner[close + 2..]),
            None => (inner, ""),
        };
        line += fragment.matches('\n').count() as u32;

        match kind {
            TagKind::Expression => emitter.expression(fragment, pre.original_line(tag_line)),
            TagKind::Statement => emitter.statement(fragment, pre.original_line(tag_line)),
            TagKind::Comment => {}
        }
        rest = after_tag;
    }

    if literal.is_empty() {
        literal_start = line;
    }
    literal.push_str(rest);
    emitter.literal(&literal, pre.original_line(literal_start));

    emitter.finish(pre.original_line(1))
}

enum TagKind {
    Expression,
    Statement,
    Comment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trim::{preprocess, TrimMode};

    fn gen(source: &str) -> Generated {
        generate(&preprocess(source, TrimMode::None), "@_erbout")
    }

    #[test]
    fn test_no_tags_single_append() {
        let out = gen("Hello World!");
        assert_eq!(
            out.body,
            "@_erbout = \"\"\n@_erbout << \"Hello World!\"\n@_erbout\n"
        );
        assert_eq!(out.line_map.original_line(2), Some(1));
    }

    #[test]
    fn test_empty_template_returns_empty_buffer() {
        let out = gen("");
        assert_eq!(out.body, "@_erbout = \"\"\n@_erbout << \"\"\n@_erbout\n");
    }

    #[test]
    fn test_expression_and_literals() {
        let out = gen("Hey <%= name %>!");
        assert_eq!(
            out.body,
            "@_erbout = \"\"\n\
             @_erbout << \"Hey \"\n\
             @_erbout << (name)\n\
             @_erbout << \"!\"\n\
             @_erbout\n"
        );
    }

    #[test]
    fn test_multiline_fragment_mapping() {
        let out = gen("<html>\n<body>\n  <h1>Hey <%= name %>!</h1>\n\n\n  <p><% fail %></p>\n</body>\n</html>");
        // Literal starting on line 1, expression tag opening on line 3.
        assert_eq!(out.line_map.original_line(2), Some(1));
        assert_eq!(out.line_map.original_line(3), Some(3));
        // The `fail` statement opens on source line 6.
        assert_eq!(out.line_map.original_line(5), Some(6));
    }

    #[test]
    fn test_comment_tag_discarded() {
        let out = gen("a<%# ignore me %>b");
        assert_eq!(
            out.body,
            "@_erbout = \"\"\n@_erbout << \"a\"\n@_erbout << \"b\"\n@_erbout\n"
        );
    }

    #[test]
    fn test_literal_escape_tag() {
        let out = gen("say <%% not a tag");
        assert!(out.body.contains("@_erbout << \"say <% not a tag\""));
    }

    #[test]
    fn test_literal_escaping() {
        let out = gen("a \"quoted\"\nline\\");
        assert!(out.body.contains(r#"@_erbout << "a \"quoted\"\nline\\""#));
    }

    #[test]
    fn test_custom_outvar() {
        let out = generate(&preprocess("<%= 1 %>", TrimMode::None), "@buf");
        assert!(out.body.starts_with("@buf = \"\"\n"));
        assert!(out.body.ends_with("@buf\n"));
    }

    #[test]
    fn test_statement_fragment_split_per_line() {
        let out = gen("<%\nif true\nend\n%>x");
        assert!(out.body.contains("\nif true\nend\n"));
    }

    #[test]
    fn test_line_map_nearest_at_or_before() {
        let mut map = LineMap::default();
        map.push(2, 1);
        map.push(5, 4);
        assert_eq!(map.original_line(1), None);
        assert_eq!(map.original_line(2), Some(1));
        assert_eq!(map.original_line(4), Some(1));
        assert_eq!(map.original_line(9), Some(4));
    }
}
