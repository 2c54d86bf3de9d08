use thiserror::Error;

use crate::filter::{Filter, FilterRule, FilterSet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterParseError {
    #[error("empty filter expression in '{input}'")]
    Empty { input: String },
    #[error("unexpected '{found}' in filter '{input}'")]
    Unexpected { found: String, input: String },
    #[error("unexpected end of filter '{input}'")]
    UnexpectedEnd { input: String },
    #[error("missing value for key '{key}' in filter '{input}'")]
    MissingValue { key: String, input: String },
    #[error("unterminated quote in filter '{input}'")]
    UnterminatedQuote { input: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Comma,
    Semicolon,
    And,
    Not,
    /// A word with quotes removed. `colon` is the byte offset of the first
    /// unquoted `:`, which separates a key from its value.
    Word { text: String, colon: Option<usize> },
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::LParen => "(".to_owned(),
            Self::RParen => ")".to_owned(),
            Self::Comma => ",".to_owned(),
            Self::Semicolon => ";".to_owned(),
            Self::And => "AND".to_owned(),
            Self::Not => "NOT".to_owned(),
            Self::Word { text, .. } => text.clone(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Self::Word { text, colon: None } if text == keyword)
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        let punct = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            ';' => Some(Token::Semicolon),
            _ => None,
        };
        if let Some(token) = punct {
            chars.next();
            tokens.push(token);
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut text = String::new();
        let mut colon = None;
        let mut quoted = false;
        while let Some(&c) = chars.peek() {
            if c == '"' {
                chars.next();
                quoted = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => text.push(escaped),
                            None => {
                                return Err(FilterParseError::UnterminatedQuote {
                                    input: input.to_owned(),
                                });
                            }
                        },
                        Some(other) => text.push(other),
                        None => {
                            return Err(FilterParseError::UnterminatedQuote {
                                input: input.to_owned(),
                            });
                        }
                    }
                }
                continue;
            }
            if c.is_whitespace() || matches!(c, '(' | ')' | ',' | ';') {
                break;
            }
            if c == ':' && colon.is_none() {
                colon = Some(text.len());
            }
            text.push(c);
            chars.next();
        }

        let token = match text.as_str() {
            "AND" if !quoted => Token::And,
            "NOT" if !quoted => Token::Not,
            _ => Token::Word { text, colon },
        };
        tokens.push(token);
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, FilterParseError> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn unexpected(&self, token: &Token) -> FilterParseError {
        FilterParseError::Unexpected {
            found: token.describe(),
            input: self.input.to_owned(),
        }
    }

    fn rule(&mut self) -> Result<FilterRule, FilterParseError> {
        let has_body = self
            .tokens
            .get(self.pos + 1)
            .is_some_and(|t| *t != Token::Semicolon);
        let make: fn(Filter) -> FilterRule = match self.peek() {
            Some(t) if has_body && t.is_keyword("include") => {
                self.pos += 1;
                FilterRule::include
            }
            Some(t) if has_body && t.is_keyword("exclude") => {
                self.pos += 1;
                FilterRule::exclude
            }
            Some(Token::Semicolon) | None => {
                return Err(FilterParseError::Empty {
                    input: self.input.to_owned(),
                });
            }
            Some(_) => FilterRule::include,
        };
        Ok(make(self.or_expr()?))
    }

    fn or_expr(&mut self) -> Result<Filter, FilterParseError> {
        let mut terms = vec![self.and_expr()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            terms.push(self.and_expr()?);
        }
        Ok(collapse(terms, Filter::Or))
    }

    fn and_expr(&mut self) -> Result<Filter, FilterParseError> {
        let mut factors = vec![self.unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            factors.push(self.unary()?);
        }
        Ok(collapse(factors, Filter::And))
    }

    fn unary(&mut self) -> Result<Filter, FilterParseError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Filter::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Filter, FilterParseError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(self.unexpected(&other)),
                    None => Err(FilterParseError::UnexpectedEnd {
                        input: self.input.to_owned(),
                    }),
                }
            }
            Some(Token::Word { text, colon }) => self.atom(text, colon),
            Some(other) => Err(self.unexpected(&other)),
            None => Err(FilterParseError::UnexpectedEnd {
                input: self.input.to_owned(),
            }),
        }
    }

    fn atom(&self, text: String, colon: Option<usize>) -> Result<Filter, FilterParseError> {
        let Some(at) = colon else {
            return Ok(if text == "*" {
                Filter::Any
            } else {
                Filter::Name(text)
            });
        };
        let (key, value) = (&text[..at], &text[at + 1..]);
        if value.is_empty() {
            return Err(FilterParseError::MissingValue {
                key: key.to_owned(),
                input: self.input.to_owned(),
            });
        }
        let value = value.to_owned();
        Ok(match key.to_ascii_lowercase().as_str() {
            "id" => Filter::Id(value),
            "name" => Filter::Name(value),
            "fullname" => Filter::FullName(value),
            _ => Filter::Metadata {
                key: key.to_owned(),
                value,
            },
        })
    }
}

fn collapse(mut filters: Vec<Filter>, combine: fn(Vec<Filter>) -> Filter) -> Filter {
    if filters.len() == 1 {
        filters.remove(0)
    } else {
        combine(filters)
    }
}

/// Parse a single filter expression.
///
/// Supports:
/// - Bare word: `"Login"` → `Name("Login")`
/// - Keyed value: `"id:t1"`, `"fullname:Suite/Login"`, `"category:smoke"`
/// - Any: `"*"`; a trailing `*` on a value matches by prefix
/// - Comma-separated (OR): `"A,B"`
/// - AND, NOT and parentheses: `"(A,B) AND NOT category:slow"`
/// - Double quotes around values with spaces: `name:"Slow Test"`
///
/// # Errors
///
/// Returns [`FilterParseError`] if the string is empty or has invalid syntax.
pub fn parse_filter(input: &str) -> Result<Filter, FilterParseError> {
    let mut parser = Parser::new(input)?;
    if parser.at_end() {
        return Err(FilterParseError::Empty {
            input: input.to_owned(),
        });
    }
    let filter = parser.or_expr()?;
    match parser.next() {
        None => Ok(filter),
        Some(token) => Err(parser.unexpected(&token)),
    }
}

/// Parse a `;`-separated list of rules, each optionally prefixed with
/// `include` or `exclude`. Unprefixed rules are inclusions. Blank input is
/// the empty set.
///
/// # Errors
///
/// Returns [`FilterParseError`] for an empty rule or invalid syntax.
pub fn parse_filter_set(input: &str) -> Result<FilterSet, FilterParseError> {
    let mut parser = Parser::new(input)?;
    let mut set = FilterSet::empty();
    if parser.at_end() {
        return Ok(set);
    }
    loop {
        set.push(parser.rule()?);
        match parser.next() {
            None => return Ok(set),
            Some(Token::Semicolon) => {}
            Some(token) => return Err(parser.unexpected(&token)),
        }
    }
}
