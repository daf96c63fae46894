//! Character cursor used by the path grammar.

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    InvalidSyntax(String),
}

impl ParseError {
    pub fn message(&self) -> &str {
        match self {
            ParseError::InvalidSyntax(m) => m,
        }
    }
}

fn syntax(msg: impl Into<String>) -> ParseError {
    ParseError::InvalidSyntax(msg.into())
}

pub struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// Byte offset of the cursor.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn eof(&self) -> bool {
        self.rest().is_empty()
    }

    pub fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Consumes characters while `keep(c, rest)` holds, `rest` starting at `c`.
    pub fn take_while<F>(&mut self, keep: F) -> &'a str
    where
        F: Fn(char, &str) -> bool,
    {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(at, c)| !keep(c, &rest[at..]))
            .map_or(rest.len(), |(at, _)| at);
        self.pos += len;
        &rest[..len]
    }

    pub fn skip_ws(&mut self) {
        self.take_while(|c, _| c.is_whitespace());
    }

    pub fn consume_char(&mut self, c: char) -> bool {
        self.consume_str(c.encode_utf8(&mut [0; 4]))
    }

    pub fn consume_str(&mut self, lit: &str) -> bool {
        let hit = self.rest().starts_with(lit);
        if hit {
            self.pos += lit.len();
        }
        hit
    }

    pub fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.consume_char(c) {
            Ok(())
        } else {
            Err(syntax(format!("expected '{c}' at offset {}", self.pos)))
        }
    }

    /// Everything up to (not including) `end`, which must follow.
    pub fn capture_until(&mut self, end: char) -> Result<&'a str, ParseError> {
        let text = self.take_while(|c, _| c != end);
        if self.peek_char() == Some(end) {
            Ok(text)
        } else {
            Err(syntax(format!("expected '{end}'")))
        }
    }

    // Optional sign, digits, and a fraction when `fraction` is set.
    fn numeral(&mut self, fraction: bool) -> &'a str {
        let start = self.pos;
        self.consume_char('-');
        self.take_while(|c, _| c.is_ascii_digit());
        if fraction && self.consume_char('.') {
            self.take_while(|c, _| c.is_ascii_digit());
        }
        &self.src[start..self.pos]
    }

    pub fn parse_int(&mut self) -> Result<i64, ParseError> {
        match self.numeral(false) {
            "" | "-" => Err(syntax("expected integer")),
            digits => digits.parse().map_err(|_| syntax(format!("integer out of range: {digits}"))),
        }
    }

    /// An integer or decimal literal, kept as `Int` when it has no fraction.
    pub fn parse_number_literal(&mut self) -> Result<Value, ParseError> {
        let text = self.numeral(true);
        if text.is_empty() || text == "-" {
            return Err(syntax("number expected"));
        }
        if text.contains('.') {
            text.parse().map(Value::Float).map_err(|_| syntax(format!("bad number {text}")))
        } else {
            text.parse().map(Value::Int).map_err(|_| syntax(format!("bad number {text}")))
        }
    }

    /// A `'…'` or `"…"` literal with backslash escapes.
    pub fn parse_quoted_string(&mut self) -> Result<String, ParseError> {
        let quote = match self.peek_char() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(syntax("expected quoted string")),
        };
        let mut chars = self.rest().char_indices().skip(1);
        let mut out = String::new();
        while let Some((at, c)) = chars.next() {
            match c {
                c if c == quote => {
                    self.pos += at + c.len_utf8();
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, e @ ('\\' | '"' | '\''))) => out.push(e),
                    Some((_, other)) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(syntax("unterminated string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn numbers_and_strings() {
        let mut p = Parser::new("-12.5 'a\\'b'");
        assert_eq!(p.parse_number_literal().unwrap(), Value::Float(-12.5));
        p.skip_ws();
        assert_eq!(p.parse_quoted_string().unwrap(), "a'b");
        assert!(p.eof());
    }

    #[test]
    fn unterminated_string_is_rejected() {
        let mut p = Parser::new("\"abc");
        assert!(p.parse_quoted_string().is_err());
    }

    #[test]
    fn take_while_sees_the_remaining_input() {
        let mut p = Parser::new("name?[0]");
        assert_eq!(p.take_while(|c, rest| !(c == '?' && rest.starts_with("?["))), "name");
        assert!(p.consume_str("?["));
        assert_eq!(p.parse_int().unwrap(), 0);
        assert!(p.expect(']').is_ok());
        assert!(p.eof());
    }
}
