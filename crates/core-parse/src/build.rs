//! Token stream to [`Program`] construction.
//!
//! Pure classification over the token slice: no side effects, all errors
//! carry the offending token. The builder preflights the connector count to
//! size the clause list, interns label names (validated against the
//! `[A-Z][A-Z0-9_-]{0,15}` alphabet, at most [`MAX_LABELS`]), unescapes
//! string operands, and compiles `findr` / `take untilr` patterns so the
//! engine receives ready-to-run programs.
//!
//! Offsets attached to locations require an explicit sign (`cursor +2l`);
//! bare counts (`take 5b`) are reserved for the length operands. That keeps
//! `find to EOF 5b` unambiguous: `5b` is a needle, `+5b` an offset.

use core_engine::{Base, CURSOR_MARK, Clause, Link, LocExpr, MAX_LABELS, Op, Program, Unit};

use crate::{ParseError, Result};

pub fn build_program(tokens: &[String]) -> Result<Program> {
    Builder::new(tokens).program()
}

const RESERVED: [&str; 5] = ["BOF", "EOF", "THEN", "AND", "OR"];

struct Builder<'a> {
    tokens: &'a [String],
    pos: usize,
    labels: Vec<String>,
}

impl<'a> Builder<'a> {
    fn new(tokens: &'a [String]) -> Builder<'a> {
        Builder {
            tokens,
            pos: 0,
            labels: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'a str> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, what: &str) -> Result<&'a str> {
        self.next()
            .ok_or_else(|| ParseError::Grammar(format!("expected {what} at end of program")))
    }

    fn program(mut self) -> Result<Program> {
        // Preflight: connectors bound the clause count.
        let connectors = self
            .tokens
            .iter()
            .filter(|t| is_connector(t))
            .count();
        let mut clauses = Vec::with_capacity(connectors + 1);
        if self.tokens.is_empty() {
            return Err(ParseError::Grammar("empty program".into()));
        }
        loop {
            let ops = self.ops()?;
            let link = match self.peek() {
                Some("THEN") => Link::Then,
                Some("AND") => Link::And,
                Some("OR") => Link::Or,
                None => Link::None,
                Some(t) => {
                    return Err(ParseError::Grammar(format!("unexpected token `{t}`")));
                }
            };
            clauses.push(Clause { ops, link });
            if self.next().is_none() {
                break;
            }
        }
        Ok(Program {
            clauses,
            label_names: self.labels,
        })
    }

    fn ops(&mut self) -> Result<Vec<Op>> {
        let mut ops = Vec::new();
        while let Some(t) = self.peek() {
            if is_connector(t) {
                break;
            }
            ops.push(self.op()?);
        }
        if ops.is_empty() {
            return Err(ParseError::Grammar("expected operation".into()));
        }
        Ok(ops)
    }

    fn op(&mut self) -> Result<Op> {
        let kw = self.expect("operation")?;
        Ok(match kw {
            "find" => {
                let to = self.opt_loc_after("to")?;
                let needle = string_bytes(self.expect("needle")?, StrMode::Raw)?;
                Op::Find { to, needle }
            }
            "findr" => {
                let to = self.opt_loc_after("to")?;
                let prog = core_regex::compile(self.expect("pattern")?)?;
                Op::FindRe { to, prog }
            }
            "skip" => {
                if self.peek() == Some("to") {
                    self.next();
                    Op::SkipTo { loc: self.loc()? }
                } else {
                    let tok = self.expect("count")?;
                    let (delta, unit) = parse_count(tok, false)?;
                    Op::Skip { delta, unit }
                }
            }
            "take" => match self.peek() {
                Some("to") => {
                    self.next();
                    Op::TakeTo { loc: self.loc()? }
                }
                Some("until") => {
                    self.next();
                    let needle = string_bytes(self.expect("needle")?, StrMode::Raw)?;
                    let at = self.opt_loc_after("at")?;
                    Op::TakeUntil { needle, at }
                }
                Some("untilr") => {
                    self.next();
                    let prog = core_regex::compile(self.expect("pattern")?)?;
                    let at = self.opt_loc_after("at")?;
                    Op::TakeUntilRe { prog, at }
                }
                _ => {
                    let tok = self.expect("count")?;
                    let (delta, unit) = parse_count(tok, false)?;
                    Op::TakeLen { delta, unit }
                }
            },
            "label" => {
                let name = self.expect("label name")?;
                Op::Label {
                    name: self.intern_label(name)?,
                }
            }
            "goto" => Op::SkipTo { loc: self.loc()? },
            "viewset" => {
                let a = self.loc()?;
                let b = self.loc()?;
                Op::ViewSet { a, b }
            }
            "viewclear" => Op::ViewClear,
            "print" => Op::Print {
                bytes: string_bytes(self.expect("string")?, StrMode::Print)?,
            },
            "fail" => Op::Fail {
                msg: string_bytes(self.expect("message")?, StrMode::Raw)?,
            },
            other => {
                return Err(ParseError::Grammar(format!("unknown operation `{other}`")));
            }
        })
    }

    fn opt_loc_after(&mut self, kw: &str) -> Result<Option<LocExpr>> {
        if self.peek() == Some(kw) {
            self.next();
            Ok(Some(self.loc()?))
        } else {
            Ok(None)
        }
    }

    fn loc(&mut self) -> Result<LocExpr> {
        let tok = self.expect("location")?;
        let base = match tok {
            "cursor" => Base::Cursor,
            "BOF" => Base::Bof,
            "EOF" => Base::Eof,
            "match-start" => Base::MatchStart,
            "match-end" => Base::MatchEnd,
            "line-start" => Base::LineStart,
            "line-end" => Base::LineEnd,
            name if is_label_name(name) => Base::Name(self.intern_label(name)?),
            other => {
                return Err(ParseError::Grammar(format!("bad location `{other}`")));
            }
        };
        if let Some(t) = self.peek()
            && looks_like_offset(t)
        {
            self.next();
            let (offset, unit) = parse_count(t, true)?;
            return Ok(LocExpr { base, offset, unit });
        }
        Ok(LocExpr::at(base))
    }

    fn intern_label(&mut self, name: &str) -> Result<u16> {
        if !is_label_name(name) {
            return Err(ParseError::LabelFmt(format!(
                "invalid label name `{name}` (want [A-Z][A-Z0-9_-], at most 16 chars)"
            )));
        }
        if RESERVED.contains(&name) {
            return Err(ParseError::LabelFmt(format!("`{name}` is reserved")));
        }
        if let Some(i) = self.labels.iter().position(|l| l == name) {
            return Ok(i as u16);
        }
        if self.labels.len() >= MAX_LABELS {
            return Err(ParseError::LabelFmt(format!(
                "too many labels (limit {MAX_LABELS})"
            )));
        }
        self.labels.push(name.to_string());
        Ok((self.labels.len() - 1) as u16)
    }
}

fn is_connector(t: &str) -> bool {
    matches!(t, "THEN" | "AND" | "OR")
}

fn is_label_name(t: &str) -> bool {
    let mut chars = t.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    t.len() <= 16
        && first.is_ascii_uppercase()
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// A location offset: explicit sign, digits, unit suffix.
fn looks_like_offset(t: &str) -> bool {
    let rest = match t.strip_prefix(['+', '-']) {
        Some(rest) => rest,
        None => return false,
    };
    rest.len() >= 2
        && rest[..rest.len() - 1].bytes().all(|b| b.is_ascii_digit())
        && matches!(rest.as_bytes()[rest.len() - 1], b'b' | b'l' | b'c')
}

/// Parse `[+|-]digits(b|l|c)`. `signed_only` requires the sign (location
/// offsets); length operands accept bare counts.
fn parse_count(t: &str, signed_only: bool) -> Result<(i64, Unit)> {
    let bad = || ParseError::Grammar(format!("bad count `{t}` (want e.g. 5b, -2l, +3c)"));
    let (neg, rest) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => match t.strip_prefix('+') {
            Some(rest) => (false, rest),
            None if signed_only => return Err(bad()),
            None => (false, t),
        },
    };
    if rest.len() < 2 {
        return Err(bad());
    }
    let (digits, unit) = rest.split_at(rest.len() - 1);
    let unit = match unit {
        "b" => Unit::Bytes,
        "l" => Unit::Lines,
        "c" => Unit::Chars,
        _ => return Err(bad()),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let n: i64 = digits.parse().map_err(|_| bad())?;
    Ok((if neg { -n } else { n }, unit))
}

enum StrMode {
    /// Needles, fail messages: escapes only, NUL allowed.
    Raw,
    /// Print literals: `{cursor}` becomes the sentinel, NUL rejected.
    Print,
}

fn string_bytes(s: &str, mode: StrMode) -> Result<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            let Some(&esc) = bytes.get(i + 1) else {
                return Err(ParseError::Grammar("dangling backslash".into()));
            };
            let decoded = match esc {
                b'n' => b'\n',
                b't' => b'\t',
                b'r' => b'\r',
                b'0' => 0,
                b'\\' => b'\\',
                b'"' => b'"',
                b'{' => b'{',
                b'}' => b'}',
                b'x' => {
                    let hex = bytes
                        .get(i + 2..i + 4)
                        .and_then(|h| std::str::from_utf8(h).ok())
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| {
                            ParseError::Grammar(format!("bad \\x escape in `{s}`"))
                        })?;
                    i += 2;
                    hex
                }
                other => {
                    return Err(ParseError::Grammar(format!(
                        "unknown escape `\\{}`",
                        other as char
                    )));
                }
            };
            if decoded == 0 && matches!(mode, StrMode::Print) {
                return Err(ParseError::Grammar("NUL not allowed in print string".into()));
            }
            out.push(decoded);
            i += 2;
        } else if matches!(mode, StrMode::Print) && bytes[i..].starts_with(b"{cursor}") {
            out.push(CURSOR_MARK);
            i += "{cursor}".len();
        } else {
            out.push(b);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        crate::split_program(s).unwrap()
    }

    fn build(s: &str) -> Program {
        build_program(&toks(s)).unwrap()
    }

    #[test]
    fn single_clause_take() {
        let p = build("take 5b");
        assert_eq!(p.clauses.len(), 1);
        assert_eq!(p.clauses[0].link, Link::None);
        assert!(matches!(
            p.clauses[0].ops[0],
            Op::TakeLen {
                delta: 5,
                unit: Unit::Bytes
            }
        ));
    }

    #[test]
    fn connectors_split_clauses() {
        let p = build("take 1b THEN take 2l AND take 3c OR viewclear");
        let links: Vec<Link> = p.clauses.iter().map(|c| c.link).collect();
        assert_eq!(links, vec![Link::Then, Link::And, Link::Or, Link::None]);
    }

    #[test]
    fn find_with_target_location() {
        let p = build(r#"find to EOF "needle""#);
        match &p.clauses[0].ops[0] {
            Op::Find { to: Some(loc), needle } => {
                assert_eq!(loc.base, Base::Eof);
                assert_eq!(needle, b"needle");
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn unsigned_token_after_location_is_a_needle() {
        let p = build("find to EOF 5b");
        match &p.clauses[0].ops[0] {
            Op::Find { to: Some(loc), needle } => {
                assert_eq!(loc.offset, 0);
                assert_eq!(needle, b"5b");
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn signed_offset_binds_to_location() {
        let p = build("skip to line-start +2l");
        match &p.clauses[0].ops[0] {
            Op::SkipTo { loc } => {
                assert_eq!(loc.base, Base::LineStart);
                assert_eq!(loc.offset, 2);
                assert_eq!(loc.unit, Unit::Lines);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn goto_is_skip_to() {
        let p = build("label TOP goto TOP");
        assert!(matches!(p.clauses[0].ops[0], Op::Label { name: 0 }));
        match &p.clauses[0].ops[1] {
            Op::SkipTo { loc } => assert_eq!(loc.base, Base::Name(0)),
            other => panic!("unexpected op {other:?}"),
        }
        assert_eq!(p.label_names, vec!["TOP".to_string()]);
    }

    #[test]
    fn take_until_with_at() {
        let p = build(r#"take until "x" at line-start -1l"#);
        match &p.clauses[0].ops[0] {
            Op::TakeUntil { needle, at: Some(loc) } => {
                assert_eq!(needle, b"x");
                assert_eq!(loc.offset, -1);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn print_cursor_interpolation_and_escapes() {
        let p = build(r#"print "pos={cursor}\n""#);
        match &p.clauses[0].ops[0] {
            Op::Print { bytes } => {
                assert_eq!(bytes.as_slice(), b"pos=\x00\n");
            }
            other => panic!("unexpected op {other:?}"),
        }
        // Braces can be escaped to defeat interpolation.
        let p = build(r#"print "\{cursor}""#);
        match &p.clauses[0].ops[0] {
            Op::Print { bytes } => assert_eq!(bytes.as_slice(), b"{cursor}"),
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn needles_may_contain_nul_prints_may_not() {
        let p = build(r#"find "a\x00b""#);
        match &p.clauses[0].ops[0] {
            Op::Find { needle, .. } => assert_eq!(needle.as_slice(), b"a\x00b"),
            other => panic!("unexpected op {other:?}"),
        }
        assert!(matches!(
            build_program(&toks(r#"print "a\0b""#)),
            Err(ParseError::Grammar(_))
        ));
    }

    #[test]
    fn regex_ops_compile_at_build_time() {
        let p = build(r#"findr "[0-9]+" take untilr "\s""#);
        assert!(matches!(p.clauses[0].ops[0], Op::FindRe { .. }));
        assert!(matches!(p.clauses[0].ops[1], Op::TakeUntilRe { .. }));
        assert!(matches!(
            build_program(&toks(r#"findr "(unclosed""#)),
            Err(ParseError::Regex(_))
        ));
    }

    #[test]
    fn label_validation() {
        assert!(matches!(
            build_program(&toks("label lower")),
            Err(ParseError::LabelFmt(_))
        ));
        assert!(matches!(
            build_program(&toks("label EOF")),
            Err(ParseError::LabelFmt(_))
        ));
        assert!(matches!(
            build_program(&toks("label TOOLONGTOOLONGTOO")),
            Err(ParseError::LabelFmt(_))
        ));
        let p = build("label A-OK_2");
        assert_eq!(p.label_names, vec!["A-OK_2".to_string()]);
    }

    #[test]
    fn grammar_errors() {
        assert!(build_program(&toks("take")).is_err());
        assert!(build_program(&toks("take 5x")).is_err());
        assert!(build_program(&toks("frobnicate")).is_err());
        assert!(build_program(&toks("take 1b THEN")).is_err());
        assert!(build_program(&[]).is_err());
        assert!(build_program(&toks("viewset BOF")).is_err());
    }

    #[test]
    fn labels_are_interned_once() {
        let p = build("label A goto A THEN label B goto A");
        assert_eq!(p.label_names.len(), 2);
    }
}
