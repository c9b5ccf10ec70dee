//! Safe literal evaluation for the right-hand side of filter expressions.
//!
//! Accepts numbers, quoted strings (single or double quotes), `True`,
//! `False`, `None`, and flat lists/tuples of those. Nothing is ever executed: text that
//! is not a literal is kept verbatim as a string, so `state==NC` compares
//! against `"NC"`.

use crate::query::value::Value;

/// Evaluated right-hand side.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    /// Single scalar.
    Scalar(Value),
    /// Bracketed list, parenthesized tuple, or bare comma-separated tuple.
    List(Vec<Value>),
}

/// Evaluates `text` as a literal, falling back to the trimmed text itself.
pub fn parse_literal(text: &str) -> Literal {
    let trimmed = text.trim();
    match Cursor::new(trimmed).parse_top() {
        Some(lit) => lit,
        None => Literal::Scalar(Value::String(trimmed.to_owned())),
    }
}

/// Evaluates `text` as a scalar; lists fall back to their text.
pub fn parse_scalar(text: &str) -> Value {
    match parse_literal(text) {
        Literal::Scalar(value) => value,
        Literal::List(_) => Value::String(text.trim().to_owned()),
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn parse_top(&mut self) -> Option<Literal> {
        self.skip_ws();
        if self.at_end() {
            return None;
        }
        let lit = match self.peek()? {
            '[' => Literal::List(self.parse_seq('[', ']')?),
            '(' => Literal::List(self.parse_seq('(', ')')?),
            _ => {
                let first = self.parse_scalar()?;
                self.skip_ws();
                if self.peek() == Some(',') {
                    // bare tuple: `1, 2, 3`
                    let mut items = vec![first];
                    while self.peek() == Some(',') {
                        self.bump();
                        self.skip_ws();
                        if self.at_end() {
                            break;
                        }
                        items.push(self.parse_scalar()?);
                        self.skip_ws();
                    }
                    Literal::List(items)
                } else {
                    Literal::Scalar(first)
                }
            }
        };
        self.skip_ws();
        self.at_end().then_some(lit)
    }

    fn parse_seq(&mut self, open: char, close: char) -> Option<Vec<Value>> {
        if self.bump()? != open {
            return None;
        }
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek()? == close {
                self.bump();
                return Some(items);
            }
            items.push(self.parse_scalar()?);
            self.skip_ws();
            match self.bump()? {
                ',' => continue,
                c if c == close => return Some(items),
                _ => return None,
            }
        }
    }

    fn parse_scalar(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            '"' | '\'' => self.parse_string(),
            '[' | '(' | ']' | ')' | ',' => None,
            _ => self.parse_bare(),
        }
    }

    fn parse_string(&mut self) -> Option<Value> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    'u' => {
                        let hex = self.src.get(self.pos..self.pos + 4)?;
                        let code = u32::from_str_radix(hex, 16).ok()?;
                        out.push(char::from_u32(code)?);
                        self.pos += 4;
                    }
                    other => out.push(other),
                },
                c if c == quote => return Some(Value::String(out)),
                c => out.push(c),
            }
        }
    }

    fn parse_bare(&mut self) -> Option<Value> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == ',' || ch == ']' || ch == ')' || ch.is_whitespace() {
                break;
            }
            self.bump();
        }
        let token = &self.src[start..self.pos];
        match token {
            "True" => return Some(Value::Bool(true)),
            "False" => return Some(Value::Bool(false)),
            "None" => return Some(Value::Null),
            _ => {}
        }
        let numeric_start = token
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+' || c == '.');
        if !numeric_start || has_leading_zero(token) {
            return None;
        }
        if let Ok(i) = token.parse::<i64>() {
            return Some(Value::Int(i));
        }
        token
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float)
    }
}

/// Integer text like `007`: not a number literal, so it stays text.
fn has_leading_zero(token: &str) -> bool {
    let digits = token.trim_start_matches(['-', '+']);
    digits.len() > 1
        && digits.starts_with('0')
        && digits.bytes().all(|b| b.is_ascii_digit())
        && digits.bytes().any(|b| b != b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars() {
        assert_eq!(parse_literal("42"), Literal::Scalar(Value::Int(42)));
        assert_eq!(parse_literal(" -1.5 "), Literal::Scalar(Value::Float(-1.5)));
        assert_eq!(parse_literal("'NC'"), Literal::Scalar(Value::from("NC")));
        assert_eq!(parse_literal("\"a\\\"b\""), Literal::Scalar(Value::from("a\"b")));
        assert_eq!(parse_literal("True"), Literal::Scalar(Value::Bool(true)));
        assert_eq!(parse_literal("None"), Literal::Scalar(Value::Null));
    }

    #[test]
    fn bare_text_falls_back_to_string() {
        assert_eq!(parse_literal("NC"), Literal::Scalar(Value::from("NC")));
        assert_eq!(
            parse_literal("hairy vetch"),
            Literal::Scalar(Value::from("hairy vetch"))
        );
        assert_eq!(parse_literal("inf"), Literal::Scalar(Value::from("inf")));
        assert_eq!(parse_literal("2024-01-05"), Literal::Scalar(Value::from("2024-01-05")));
    }

    #[test]
    fn zero_padded_integers_stay_text() {
        assert_eq!(parse_literal("007"), Literal::Scalar(Value::from("007")));
        assert_eq!(parse_literal("-01"), Literal::Scalar(Value::from("-01")));
        assert_eq!(parse_literal("0"), Literal::Scalar(Value::Int(0)));
        assert_eq!(parse_literal("00"), Literal::Scalar(Value::Int(0)));
        assert_eq!(parse_literal("0.5"), Literal::Scalar(Value::Float(0.5)));
        assert_eq!(parse_literal("[007, 8]"), Literal::Scalar(Value::from("[007, 8]")));
    }

    #[test]
    fn only_python_spellings_are_keywords() {
        assert_eq!(parse_literal("False"), Literal::Scalar(Value::Bool(false)));
        assert_eq!(parse_literal("true"), Literal::Scalar(Value::from("true")));
        assert_eq!(parse_literal("false"), Literal::Scalar(Value::from("false")));
        assert_eq!(parse_literal("null"), Literal::Scalar(Value::from("null")));
    }

    #[test]
    fn lists_and_tuples() {
        assert_eq!(
            parse_literal(r#"["barley", 'wheat', 3]"#),
            Literal::List(vec![Value::from("barley"), Value::from("wheat"), Value::Int(3)])
        );
        assert_eq!(parse_literal("(1, 2,)"), Literal::List(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(parse_literal("1, 2"), Literal::List(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(parse_literal("[]"), Literal::List(vec![]));
    }

    #[test]
    fn nested_or_unbalanced_lists_stay_text() {
        assert_eq!(parse_literal("[[1]]"), Literal::Scalar(Value::from("[[1]]")));
        assert_eq!(parse_literal("[1, 2"), Literal::Scalar(Value::from("[1, 2")));
        assert_eq!(parse_literal("barley, wheat"), Literal::Scalar(Value::from("barley, wheat")));
    }
}
