//! Compiler for generated procedure bodies.
//!
//! The code generator emits a line-oriented body (buffer initialization,
//! literal/expression appends, verbatim statements, buffer return); this
//! module compiles that text into an executable statement tree. The tree is
//! the backend behind a compiled unit — the cache and evaluator treat it as
//! an opaque invocable and never inspect its shape.
//!
//! Every node carries the generated line it came from, so a failure during
//! evaluation can be traced back through the line map.

pub(crate) mod expr;

use expr::{parse_expr, Expr, UnaryOp};

/// Executable statement tree compiled from a generated body.
#[derive(Debug)]
pub(crate) struct Program {
    pub nodes: Vec<Node>,
}

#[derive(Debug)]
pub(crate) enum Node {
    /// Append literal text to the buffer.
    Text(String),
    /// Append an expression's display value to the buffer.
    Emit { expr: Expr, line: u32 },
    /// Conditional: arms are tried in order, `None` cond is `else`.
    If { arms: Vec<Arm> },
    /// Explicit raise from template code.
    Fail { message: Option<Expr>, line: u32 },
    /// `@attr = expr` assignment.
    AssignAttr { name: String, expr: Expr, line: u32 },
    /// Expression statement, evaluated and discarded.
    Discard { expr: Expr, line: u32 },
}

#[derive(Debug)]
pub(crate) struct Arm {
    pub cond: Option<Expr>,
    /// Generated line of the arm's `if`/`elsif`/`else` keyword.
    pub line: u32,
    pub nodes: Vec<Node>,
}

/// Compilation failure, located by generated line. The caller translates
/// the line back to template source through the line map.
#[derive(Debug)]
pub(crate) struct ProgramError {
    pub line: u32,
    pub message: String,
}

impl ProgramError {
    fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// An open `if`/`unless` block while compiling.
struct Frame {
    line: u32,
    arms: Vec<Arm>,
    seen_else: bool,
}

/// Compile a generated body into a [`Program`].
pub(crate) fn compile(body: &str, outvar: &str) -> Result<Program, ProgramError> {
    let lines: Vec<&str> = body.lines().collect();
    let header = format!("{outvar} = \"\"");
    if lines.first() != Some(&header.as_str()) {
        return Err(ProgramError::new(1, "missing buffer initialization"));
    }
    let last = lines.len() as u32;
    if lines.last() != Some(&outvar) {
        return Err(ProgramError::new(last, "missing buffer return"));
    }

    let append_prefix = format!("{outvar} << ");
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for (idx, raw) in lines.iter().enumerate().take(lines.len() - 1).skip(1) {
        let line = (idx + 1) as u32;
        let node = if let Some(rest) = raw.strip_prefix(&append_prefix) {
            parse_append(rest, line)?
        } else {
            match parse_statement(raw, line)? {
                Parsed::Node(node) => node,
                Parsed::OpenIf(cond) => {
                    stack.push(Frame {
                        line,
                        arms: vec![Arm {
                            cond: Some(cond),
                            line,
                            nodes: Vec::new(),
                        }],
                        seen_else: false,
                    });
                    continue;
                }
                Parsed::Elsif(cond) => {
                    let frame = stack
                        .last_mut()
                        .ok_or_else(|| ProgramError::new(line, "'elsif' without 'if'"))?;
                    if frame.seen_else {
                        return Err(ProgramError::new(line, "'elsif' after 'else'"));
                    }
                    frame.arms.push(Arm {
                        cond: Some(cond),
                        line,
                        nodes: Vec::new(),
                    });
                    continue;
                }
                Parsed::Else => {
                    let frame = stack
                        .last_mut()
                        .ok_or_else(|| ProgramError::new(line, "'else' without 'if'"))?;
                    if frame.seen_else {
                        return Err(ProgramError::new(line, "duplicate 'else'"));
                    }
                    frame.seen_else = true;
                    frame.arms.push(Arm {
                        cond: None,
                        line,
                        nodes: Vec::new(),
                    });
                    continue;
                }
                Parsed::End => {
                    let frame = stack
                        .pop()
                        .ok_or_else(|| ProgramError::new(line, "'end' without 'if'"))?;
                    let node = Node::If { arms: frame.arms };
                    push_node(&mut root, &mut stack, node);
                    continue;
                }
            }
        };
        push_node(&mut root, &mut stack, node);
    }

    if let Some(frame) = stack.last() {
        return Err(ProgramError::new(frame.line, "missing 'end'"));
    }
    Ok(Program { nodes: root })
}

fn push_node(root: &mut Vec<Node>, stack: &mut [Frame], node: Node) {
    match stack.last_mut() {
        Some(frame) => frame
            .arms
            .last_mut()
            .expect("open frame always has an arm")
            .nodes
            .push(node),
        None => root.push(node),
    }
}

/// A parsed body line that is not an append.
enum Parsed {
    Node(Node),
    OpenIf(Expr),
    Elsif(Expr),
    Else,
    End,
}

fn parse_append(rest: &str, line: u32) -> Result<Node, ProgramError> {
    if let Some(literal) = rest.strip_prefix('"') {
        let text = unescape(literal, line)?;
        Ok(Node::Text(text))
    } else if let Some(inner) = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        let expr = parse_expr(inner).map_err(|m| ProgramError::new(line, m))?;
        Ok(Node::Emit { expr, line })
    } else {
        Err(ProgramError::new(line, "malformed append"))
    }
}

/// Unescape a generated string literal (opening quote already consumed).
fn unescape(literal: &str, line: u32) -> Result<String, ProgramError> {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    loop {
        match chars.next() {
            None => return Err(ProgramError::new(line, "unterminated string literal")),
            Some('"') => {
                if chars.next().is_some() {
                    return Err(ProgramError::new(line, "trailing characters after literal"));
                }
                return Ok(out);
            }
            Some('\\') => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                other => {
                    return Err(ProgramError::new(
                        line,
                        format!("unknown escape {other:?}"),
                    ))
                }
            },
            Some(ch) => out.push(ch),
        }
    }
}

fn parse_statement(raw: &str, line: u32) -> Result<Parsed, ProgramError> {
    let stmt = raw.trim();
    let (word, rest) = split_word(stmt);
    match word {
        "if" => {
            let cond = parse_expr(rest).map_err(|m| ProgramError::new(line, m))?;
            Ok(Parsed::OpenIf(cond))
        }
        "unless" => {
            let cond = parse_expr(rest).map_err(|m| ProgramError::new(line, m))?;
            Ok(Parsed::OpenIf(Expr::Unary(UnaryOp::Not, Box::new(cond))))
        }
        "elsif" => {
            let cond = parse_expr(rest).map_err(|m| ProgramError::new(line, m))?;
            Ok(Parsed::Elsif(cond))
        }
        "else" if rest.is_empty() => Ok(Parsed::Else),
        "end" if rest.is_empty() => Ok(Parsed::End),
        "fail" | "raise" => {
            let message = if rest.is_empty() {
                None
            } else {
                Some(parse_expr(rest).map_err(|m| ProgramError::new(line, m))?)
            };
            Ok(Parsed::Node(Node::Fail { message, line }))
        }
        _ => {
            if let Some((name, value)) = split_attr_assignment(stmt) {
                let expr = parse_expr(value).map_err(|m| ProgramError::new(line, m))?;
                return Ok(Parsed::Node(Node::AssignAttr {
                    name: name.to_string(),
                    expr,
                    line,
                }));
            }
            let expr = parse_expr(stmt).map_err(|m| ProgramError::new(line, m))?;
            Ok(Parsed::Node(Node::Discard { expr, line }))
        }
    }
}

fn split_word(stmt: &str) -> (&str, &str) {
    match stmt.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (stmt, ""),
    }
}

/// Detect `@name = expr` (and not `@name == expr`).
fn split_attr_assignment(stmt: &str) -> Option<(&str, &str)> {
    let rest = stmt.strip_prefix('@')?;
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let (name, tail) = rest.split_at(end);
    let tail = tail.trim_start();
    let value = tail.strip_prefix('=')?;
    if value.starts_with('=') {
        return None; // `==` is a comparison, not an assignment
    }
    Some((name, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(lines: &[&str]) -> String {
        let mut s = String::from("@_erbout = \"\"\n");
        for l in lines {
            s.push_str(l);
            s.push('\n');
        }
        s.push_str("@_erbout\n");
        s
    }

    #[test]
    fn test_compile_appends() {
        let program = compile(&body(&["@_erbout << \"Hey \"", "@_erbout << (name)"]), "@_erbout")
            .unwrap();
        assert_eq!(program.nodes.len(), 2);
        assert!(matches!(program.nodes[0], Node::Text(ref t) if t == "Hey "));
        assert!(matches!(program.nodes[1], Node::Emit { line: 3, .. }));
    }

    #[test]
    fn test_compile_if_else() {
        let program = compile(
            &body(&[
                "if @flag",
                "@_erbout << \"yes\"",
                "else",
                "@_erbout << \"no\"",
                "end",
            ]),
            "@_erbout",
        )
        .unwrap();
        assert_eq!(program.nodes.len(), 1);
        let Node::If { arms } = &program.nodes[0] else {
            panic!("expected If node");
        };
        assert_eq!(arms.len(), 2);
        assert!(arms[0].cond.is_some());
        assert!(arms[1].cond.is_none());
    }

    #[test]
    fn test_compile_unless_negates() {
        let program = compile(&body(&["unless @flag", "end"]), "@_erbout").unwrap();
        let Node::If { arms } = &program.nodes[0] else {
            panic!("expected If node");
        };
        assert!(matches!(arms[0].cond, Some(Expr::Unary(UnaryOp::Not, _))));
    }

    #[test]
    fn test_compile_fail_and_assignment() {
        let program = compile(
            &body(&["fail \"boom\"", "@captured = @_erbout", "name"]),
            "@_erbout",
        )
        .unwrap();
        assert!(matches!(program.nodes[0], Node::Fail { message: Some(_), line: 2 }));
        assert!(matches!(program.nodes[1], Node::AssignAttr { ref name, .. } if name == "captured"));
        assert!(matches!(program.nodes[2], Node::Discard { .. }));
    }

    #[test]
    fn test_missing_end_is_error() {
        let err = compile(&body(&["if true"]), "@_erbout").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("missing 'end'"));
    }

    #[test]
    fn test_stray_end_is_error() {
        let err = compile(&body(&["end"]), "@_erbout").unwrap_err();
        assert!(err.message.contains("'end' without 'if'"));
    }

    #[test]
    fn test_malformed_expression_is_error() {
        let err = compile(&body(&["@_erbout << (1 +)"]), "@_erbout").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_missing_header_is_error() {
        let err = compile("@_erbout << \"x\"\n@_erbout\n", "@_erbout").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_attr_equality_is_not_assignment() {
        let program = compile(&body(&["@a == 1"]), "@_erbout").unwrap();
        assert!(matches!(program.nodes[0], Node::Discard { .. }));
    }
}
