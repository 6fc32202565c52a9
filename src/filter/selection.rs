//! Selection expression parser for `--where`
//!
//! ```text
//! expr       := term ( ("||" | "|") term )*
//! term       := factor ( ("&&" | "&") factor )*
//! factor     := "!" factor | "(" expr ")" | comparison
//! comparison := ("cat" | "test" | "id") ("==" | "!=") value
//! value      := word | 'quoted' | "quoted"     (comma separated lists allowed)
//! ```

use super::builder::split_list;
use super::{FilterParseError, TestFilter};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Eq,
    Ne,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

/// Parse a selection expression into a filter
pub fn parse_selection(input: &str) -> Result<TestFilter, FilterParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let filter = parser.expr()?;
    if let Some((position, token)) = parser.tokens.get(parser.pos) {
        return Err(error(*position, format!("unexpected {token:?}")));
    }
    Ok(filter)
}

fn error(position: usize, message: impl Into<String>) -> FilterParseError {
    FilterParseError::Selection {
        position,
        message: message.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, FilterParseError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);

    while let Some(&(pos, c)) = chars.get(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((pos, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((pos, Token::RParen));
                i += 1;
            }
            '&' => {
                tokens.push((pos, Token::And));
                i += if peek(i + 1) == Some('&') { 2 } else { 1 };
            }
            '|' => {
                tokens.push((pos, Token::Or));
                i += if peek(i + 1) == Some('|') { 2 } else { 1 };
            }
            '!' if peek(i + 1) == Some('=') => {
                tokens.push((pos, Token::Ne));
                i += 2;
            }
            '!' => {
                tokens.push((pos, Token::Not));
                i += 1;
            }
            '=' => {
                tokens.push((pos, Token::Eq));
                i += if peek(i + 1) == Some('=') { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match peek(i) {
                        Some(ch) if ch == quote => break,
                        Some('\\') if peek(i + 1).is_some() => {
                            value.extend(peek(i + 1));
                            i += 2;
                        }
                        Some(ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => return Err(error(pos, "unterminated string")),
                    }
                }
                i += 1;
                tokens.push((pos, Token::Word(value)));
            }
            _ => {
                let mut value = String::new();
                while let Some(ch) = peek(i) {
                    if ch.is_whitespace() || "()&|!=".contains(ch) {
                        break;
                    }
                    value.push(ch);
                    i += 1;
                }
                tokens.push((pos, Token::Word(value)));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<TestFilter, FilterParseError> {
        let mut parts = vec![self.term()?];
        while self.peek() == Some(&Token::Or) {
            self.advance();
            parts.push(self.term()?);
        }
        Ok(collapse(parts, TestFilter::Or))
    }

    fn term(&mut self) -> Result<TestFilter, FilterParseError> {
        let mut parts = vec![self.factor()?];
        while self.peek() == Some(&Token::And) {
            self.advance();
            parts.push(self.factor()?);
        }
        Ok(collapse(parts, TestFilter::And))
    }

    fn factor(&mut self) -> Result<TestFilter, FilterParseError> {
        let position = self.position();
        match self.advance() {
            Some(Token::Not) => Ok(TestFilter::negate(self.factor()?)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(error(position, "missing closing parenthesis")),
                }
            }
            Some(Token::Word(key)) => self.comparison(&key, position),
            Some(other) => Err(error(position, format!("unexpected {other:?}"))),
            None => Err(error(position, "unexpected end of expression")),
        }
    }

    fn comparison(&mut self, key: &str, position: usize) -> Result<TestFilter, FilterParseError> {
        let negated = match self.advance() {
            Some(Token::Eq) => false,
            Some(Token::Ne) => true,
            _ => return Err(error(position, format!("expected == or != after '{key}'"))),
        };

        let value = match self.advance() {
            Some(Token::Word(value)) if !value.is_empty() => value,
            _ => return Err(error(position, format!("expected a value for '{key}'"))),
        };

        let values = split_list(&value);
        let filter = match key.to_lowercase().as_str() {
            "cat" | "category" => TestFilter::Category(values),
            "test" | "name" => TestFilter::Name(values),
            "id" => TestFilter::Id(values),
            other => return Err(error(position, format!("unknown property '{other}'"))),
        };

        Ok(if negated {
            TestFilter::negate(filter)
        } else {
            filter
        })
    }
}

fn collapse(mut parts: Vec<TestFilter>, combine: fn(Vec<TestFilter>) -> TestFilter) -> TestFilter {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        combine(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_comparisons() {
        assert_eq!(parse_selection("cat == Fast").unwrap(), TestFilter::categories(["Fast"]));
        assert_eq!(
            parse_selection("cat!=Slow").unwrap(),
            TestFilter::negate(TestFilter::categories(["Slow"]))
        );
        assert_eq!(
            parse_selection("test == 'My Suite.Case One'").unwrap(),
            TestFilter::names(["My Suite.Case One"])
        );
        assert_eq!(parse_selection("id==1-1001,1-1002").unwrap(), TestFilter::ids(["1-1001", "1-1002"]));
    }

    #[test]
    fn test_precedence() {
        let filter = parse_selection("cat==A || cat==B && !cat==C").unwrap();
        assert_eq!(
            filter,
            TestFilter::Or(vec![
                TestFilter::categories(["A"]),
                TestFilter::And(vec![
                    TestFilter::categories(["B"]),
                    TestFilter::negate(TestFilter::categories(["C"])),
                ]),
            ])
        );
    }

    #[test]
    fn test_parentheses_and_single_operators() {
        let filter = parse_selection("(cat==A | cat==B) & test==X").unwrap();
        assert_eq!(
            filter,
            TestFilter::And(vec![
                TestFilter::Or(vec![TestFilter::categories(["A"]), TestFilter::categories(["B"])]),
                TestFilter::names(["X"]),
            ])
        );
    }

    #[test]
    fn test_errors_report_position() {
        let err = parse_selection("cat == A &&").unwrap_err();
        assert!(matches!(err, FilterParseError::Selection { .. }));

        let err = parse_selection("color == red").unwrap_err();
        assert!(matches!(err, FilterParseError::Selection { position: 0, .. }));

        assert!(parse_selection("(cat == A").is_err());
        assert!(parse_selection("cat == 'open").is_err());
        assert!(parse_selection("cat == A)").is_err());
    }
}
