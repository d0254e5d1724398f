//! Whole-program tokenization.
//!
//! Splits a single program string into the same tokens the shell would have
//! delivered as separate operands: whitespace separates tokens, double
//! quotes group them, and inside quotes `\"` produces a literal quote
//! without ending the token. All other bytes — including backslashes —
//! pass through untouched; string-operand escapes (`\n`, `\xHH`, …) are the
//! builder's job, so both arrival paths see identical token bytes.

use crate::{ParseError, Result};

pub fn split_program(text: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut tok = String::new();
        if c == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' if chars.peek() == Some(&'"') => {
                        chars.next();
                        tok.push('"');
                    }
                    _ => tok.push(c),
                }
            }
            if !closed {
                return Err(ParseError::Grammar("unterminated quote".into()));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                tok.push(c);
                chars.next();
            }
        }
        tokens.push(tok);
    }
    Ok(tokens)
}
