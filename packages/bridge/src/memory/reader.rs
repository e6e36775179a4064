//! S-expression reader for construct and expression text

use crate::config::MAX_NESTING_DEPTH;
use crate::value::{format_float, quote_string};
use std::fmt;
use thiserror::Error;

/// Reader failure with the position it was detected at
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at line {line}, column {col}")]
pub struct ReadError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

/// One datum of source text
#[derive(Debug, Clone, PartialEq)]
pub enum Sexp {
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(String),
    /// `[name]`
    InstanceName(String),
    /// `?name`, or `?` alone for an empty name
    Variable(String),
    /// `$?name`
    MultiVariable(String),
    List(Vec<Sexp>),
}

impl Sexp {
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Sexp::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Sexp::List(items) => Some(items),
            _ => None,
        }
    }

    /// First symbol of a list, e.g. `deftemplate` in `(deftemplate ...)`
    pub fn head(&self) -> Option<&str> {
        self.as_list()?.first()?.as_symbol()
    }

    pub fn is_atom(&self) -> bool {
        !matches!(self, Sexp::List(_) | Sexp::Variable(_) | Sexp::MultiVariable(_))
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Integer(i) => write!(f, "{i}"),
            Sexp::Float(x) => f.write_str(&format_float(*x)),
            Sexp::String(s) => f.write_str(&quote_string(s)),
            Sexp::Symbol(s) => f.write_str(s),
            Sexp::InstanceName(s) => write!(f, "[{s}]"),
            Sexp::Variable(s) => write!(f, "?{s}"),
            Sexp::MultiVariable(s) => write!(f, "$?{s}"),
            Sexp::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[inline]
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';')
}

struct Reader<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    col: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            col: 1,
            depth: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ReadError {
        ReadError {
            message: message.into(),
            line: self.line,
            col: self.col,
        }
    }

    fn current(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.current()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current() {
            if c.is_whitespace() {
                self.advance();
            } else if c == ';' {
                while let Some(c) = self.advance() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self) -> Result<String, ReadError> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("Unterminated string")),
                Some('"') => return Ok(s),
                Some('\\') => match self.advance() {
                    Some(c) => s.push(c),
                    None => return Err(self.error("Unterminated string escape")),
                },
                Some(c) => s.push(c),
            }
        }
    }

    fn read_word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.current() {
            if is_delimiter(c) {
                break;
            }
            self.advance();
        }
        &self.input[start..self.pos]
    }

    fn read_instance_name(&mut self) -> Result<String, ReadError> {
        self.advance(); // [
        let start = self.pos;
        while let Some(c) = self.current() {
            if c == ']' {
                let name = self.input[start..self.pos].to_string();
                self.advance();
                if name.is_empty() {
                    return Err(self.error("Empty instance name"));
                }
                return Ok(name);
            }
            if is_delimiter(c) {
                break;
            }
            self.advance();
        }
        Err(self.error("Unterminated instance name"))
    }

    fn read(&mut self) -> Result<Option<Sexp>, ReadError> {
        self.skip_whitespace();
        let Some(c) = self.current() else {
            return Ok(None);
        };
        let sexp = match c {
            '(' => {
                if self.depth >= MAX_NESTING_DEPTH {
                    return Err(self.error(format!("Nesting deeper than {MAX_NESTING_DEPTH} levels")));
                }
                self.advance();
                self.depth += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    match self.current() {
                        None => return Err(self.error("Missing closing parenthesis")),
                        Some(')') => {
                            self.advance();
                            self.depth -= 1;
                            break;
                        }
                        Some(_) => match self.read()? {
                            Some(item) => items.push(item),
                            None => return Err(self.error("Missing closing parenthesis")),
                        },
                    }
                }
                Sexp::List(items)
            }
            ')' => return Err(self.error("Unexpected closing parenthesis")),
            '"' => Sexp::String(self.read_string()?),
            '[' => Sexp::InstanceName(self.read_instance_name()?),
            '?' => {
                self.advance();
                Sexp::Variable(self.read_word().to_string())
            }
            '$' if self.peek(1) == Some('?') => {
                self.advance();
                self.advance();
                Sexp::MultiVariable(self.read_word().to_string())
            }
            _ => classify_word(self.read_word()),
        };
        Ok(Some(sexp))
    }
}

/// Numbers are words that parse as numbers; everything else is a symbol.
fn classify_word(word: &str) -> Sexp {
    if let Ok(i) = word.parse::<i64>() {
        return Sexp::Integer(i);
    }
    let digits = word.trim_start_matches(['+', '-']);
    let numeric_start = digits
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || (c == '.' && digits.len() > 1));
    if numeric_start {
        if let Ok(f) = word.parse::<f64>() {
            return Sexp::Float(f);
        }
    }
    Sexp::Symbol(word.to_string())
}

/// Read every datum in the input.
pub fn read_all(input: &str) -> Result<Vec<Sexp>, ReadError> {
    let mut reader = Reader::new(input);
    let mut out = Vec::new();
    while let Some(sexp) = reader.read()? {
        out.push(sexp);
    }
    Ok(out)
}

/// Read exactly one datum; trailing text other than whitespace is an error.
pub fn read_one(input: &str) -> Result<Sexp, ReadError> {
    let mut reader = Reader::new(input);
    let sexp = reader
        .read()?
        .ok_or_else(|| reader.error("Expected an expression"))?;
    reader.skip_whitespace();
    if reader.current().is_some() {
        return Err(reader.error("Unexpected text after expression"));
    }
    Ok(sexp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    mod atoms {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_numbers() {
            assert_eq!(read_one("42").unwrap(), Sexp::Integer(42));
            assert_eq!(read_one("-7").unwrap(), Sexp::Integer(-7));
            assert_eq!(read_one("9.1").unwrap(), Sexp::Float(9.1));
            assert_eq!(read_one("1e3").unwrap(), Sexp::Float(1000.0));
            assert_eq!(read_one("-.5").unwrap(), Sexp::Float(-0.5));
        }

        #[test]
        fn test_symbols_that_look_numeric() {
            assert_eq!(read_one("+").unwrap(), Sexp::Symbol("+".into()));
            assert_eq!(read_one("-").unwrap(), Sexp::Symbol("-".into()));
            assert_eq!(read_one("inf").unwrap(), Sexp::Symbol("inf".into()));
            assert_eq!(read_one("1+").unwrap(), Sexp::Symbol("1+".into()));
            assert_eq!(read_one("create$").unwrap(), Sexp::Symbol("create$".into()));
        }

        #[test]
        fn test_strings() {
            assert_eq!(read_one(r#""a \"b\" \\ c""#).unwrap(), Sexp::String(r#"a "b" \ c"#.into()));
            assert!(read_one("\"open").is_err());
        }

        #[test]
        fn test_variables_and_instance_names() {
            assert_eq!(read_one("?x").unwrap(), Sexp::Variable("x".into()));
            assert_eq!(read_one("$?rest").unwrap(), Sexp::MultiVariable("rest".into()));
            assert_eq!(read_one("?*g*").unwrap(), Sexp::Variable("*g*".into()));
            assert_eq!(read_one("[joe]").unwrap(), Sexp::InstanceName("joe".into()));
        }
    }

    mod lists {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_nested() {
            let sexp = read_one("(foo (a 1) ; comment\n (b \"x\"))").unwrap();
            assert_eq!(sexp.head(), Some("foo"));
            assert_eq!(sexp.to_string(), "(foo (a 1) (b \"x\"))");
        }

        #[test]
        fn test_unbalanced() {
            let err = read_one("(foo (a 1)").unwrap_err();
            assert!(err.message.contains("Missing closing"));
            assert!(read_one(")").is_err());
        }

        #[test]
        fn test_read_all() {
            let all = read_all("(a) (b)\n(c)").unwrap();
            assert_eq!(all.len(), 3);
            assert!(read_all("  ; nothing\n").unwrap().is_empty());
        }

        #[test]
        fn test_trailing_text() {
            assert!(read_one("(a) b").is_err());
        }

        #[test]
        fn test_nesting_limit() {
            let at_limit = format!("{}{}", "(".repeat(MAX_NESTING_DEPTH), ")".repeat(MAX_NESTING_DEPTH));
            assert!(read_one(&at_limit).is_ok());

            let too_deep = format!("{}{}", "(".repeat(5000), ")".repeat(5000));
            let err = read_one(&too_deep).unwrap_err();
            assert!(err.message.contains("Nesting deeper than"));
        }

        #[test]
        fn test_depth_resets_between_forms() {
            let form = format!("{}{}", "(".repeat(MAX_NESTING_DEPTH), ")".repeat(MAX_NESTING_DEPTH));
            let all = read_all(&format!("{form} {form} {form}")).unwrap();
            assert_eq!(all.len(), 3);
        }
    }
}
