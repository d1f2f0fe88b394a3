// Template Lexer
//
// This module implements the lexical analysis for templates. It works in two
// passes: `split_markup` cuts the source into literal text, `{{ }}` outputs and
// `{% %}` tags, and `tokenize` turns the body of an output or tag into tokens.

use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

/// Kind of a top-level markup chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupKind {
    Text,
    Output,
    Tag,
}

/// A chunk of template source. For outputs and tags `content` is the trimmed
/// body between the delimiters.
#[derive(Debug, Clone)]
pub struct Markup {
    pub kind: MarkupKind,
    pub content: String,
    pub line: usize,
}

impl Markup {
    /// First word of a tag body
    pub fn tag_name(&self) -> &str {
        self.content.split_whitespace().next().unwrap_or_default()
    }

    /// Tag body after the tag name
    pub fn tag_arguments(&self) -> &str {
        let name = self.tag_name();
        self.content[name.len()..].trim()
    }
}

static END_RAW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{%(-?)\s*endraw\s*(-?)%\}").expect("static regex is valid")
});

static END_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{%(-?)\s*endcomment\s*(-?)%\}").expect("static regex is valid")
});

/// Splits template source into text, outputs and tags, applying `-`
/// whitespace trimming. `raw` bodies are kept as text and `comment` bodies are
/// dropped.
pub fn split_markup(source: &str) -> Result<Vec<Markup>> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut line = 1;
    let mut trim_next = false;

    loop {
        let Some(open) = find_open(rest) else {
            push_text(&mut items, rest, trim_next, false, line);
            break;
        };

        let (text, markup) = rest.split_at(open);
        let (kind, close) = if markup.starts_with("{{") {
            (MarkupKind::Output, "}}")
        } else {
            (MarkupKind::Tag, "%}")
        };

        let body = &markup[2..];
        let Some(end) = body.find(close) else {
            return Err(syntax_error(
                format!("Unterminated '{}' starting", &markup[..2]),
                line + text.matches('\n').count(),
            ));
        };

        let mut inner = &body[..end];
        let trim_left = inner.starts_with('-');
        if trim_left {
            inner = &inner[1..];
        }
        let trim_right = inner.ends_with('-');
        if trim_right {
            inner = &inner[..inner.len() - 1];
        }

        push_text(&mut items, text, trim_next, trim_left, line);
        line += text.matches('\n').count();
        let markup_line = line;
        line += inner.matches('\n').count();

        rest = &body[end + close.len()..];
        trim_next = trim_right;

        let item = Markup {
            kind,
            content: inner.trim().to_string(),
            line: markup_line,
        };

        if kind == MarkupKind::Tag && (item.tag_name() == "raw" || item.tag_name() == "comment") {
            let terminator = if item.tag_name() == "raw" {
                &*END_RAW
            } else {
                &*END_COMMENT
            };
            let Some(found) = terminator.captures(rest) else {
                return Err(syntax_error(
                    format!("'{}' tag is never closed", item.tag_name()),
                    markup_line,
                ));
            };
            let whole = found.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
            let inner_trim_right = found.get(1).is_some_and(|m| !m.as_str().is_empty());
            let closing_trim = found.get(2).is_some_and(|m| !m.as_str().is_empty());

            let body_text = &rest[..whole.0];
            if item.tag_name() == "raw" {
                push_text(&mut items, body_text, trim_next, inner_trim_right, line);
            }
            line += rest[..whole.1].matches('\n').count();
            rest = &rest[whole.1..];
            trim_next = closing_trim;
            continue;
        }

        items.push(item);
    }

    Ok(items)
}

fn find_open(source: &str) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut from = 0;
    while let Some(pos) = source[from..].find('{') {
        let at = from + pos;
        if matches!(bytes.get(at + 1), Some(b'{') | Some(b'%')) {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

fn push_text(items: &mut Vec<Markup>, text: &str, trim_start: bool, trim_end: bool, line: usize) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        items.push(Markup {
            kind: MarkupKind::Text,
            content: text.to_string(),
            line,
        });
    }
}

fn syntax_error(message: impl AsRef<str>, line: usize) -> FhirConverterError {
    FhirConverterError::template_load(
        FhirConverterErrorCode::TemplateSyntaxError,
        format!("{} at line {}", message.as_ref(), line),
    )
}

/// Token types for expressions inside outputs and tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    // Literals
    Identifier,
    StringLiteral,
    NumberLiteral,
    BooleanLiteral,
    Nil,
    Empty,
    Blank,

    // Operators
    Equal,          // ==
    NotEqual,       // != or <>
    LessThan,       // <
    LessOrEqual,    // <=
    GreaterThan,    // >
    GreaterOrEqual, // >=
    Assign,         // =

    // Delimiters
    Dot,          // .
    DotDot,       // ..
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]
    Comma,        // ,
    Colon,        // :
    Pipe,         // |

    // Keywords
    And,
    Or,
    Contains,

    EOF,
}

/// A token in a template expression
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub position: usize,
    pub line: usize,
    pub column: usize,
}

/// Lexer for template expressions
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
    line: usize,
    column: usize,
    previous: Option<TokenType>,
    keywords: HashMap<&'static str, TokenType>,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer for an expression that starts on `line` of the template
    pub fn new(input: &'a str, line: usize) -> Self {
        let mut keywords = HashMap::new();
        keywords.insert("and", TokenType::And);
        keywords.insert("or", TokenType::Or);
        keywords.insert("contains", TokenType::Contains);
        keywords.insert("true", TokenType::BooleanLiteral);
        keywords.insert("false", TokenType::BooleanLiteral);
        keywords.insert("nil", TokenType::Nil);
        keywords.insert("null", TokenType::Nil);
        keywords.insert("empty", TokenType::Empty);
        keywords.insert("blank", TokenType::Blank);

        Lexer {
            chars: input.chars().peekable(),
            position: 0,
            line,
            column: 1,
            previous: None,
            keywords,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if let Some(ch) = c {
            self.position += 1;
            self.column += 1;
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            }
        }
        c
    }

    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    fn error(&self, message: impl AsRef<str>) -> FhirConverterError {
        FhirConverterError::template_load(
            FhirConverterErrorCode::TemplateSyntaxError,
            format!("{} at line {}, column {}", message.as_ref(), self.line, self.column),
        )
    }

    fn skip_whitespace(&mut self) {
        while let Some(&c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.advance();
        }
    }

    fn identifier(&mut self, position: usize, line: usize, column: usize) -> Token {
        let mut identifier = String::new();
        while let Some(&c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '?' {
                identifier.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // After a dot every word is a property name
        let token_type = match self.keywords.get(identifier.as_str()) {
            Some(keyword) if self.previous != Some(TokenType::Dot) => *keyword,
            _ => TokenType::Identifier,
        };

        Token {
            token_type,
            lexeme: identifier,
            position,
            line,
            column,
        }
    }

    fn number(&mut self, position: usize, line: usize, column: usize) -> Token {
        let mut number = String::new();
        if let Some(&'-') = self.peek() {
            number.push('-');
            self.advance();
        }

        // `PID.3.1` is a path, not the decimal 3.1
        let allow_decimal = self.previous != Some(TokenType::Dot);
        let mut has_decimal = false;
        loop {
            match self.peek() {
                Some(&c) if c.is_ascii_digit() => {
                    number.push(c);
                    self.advance();
                }
                Some(&'.') if allow_decimal && !has_decimal => {
                    // Lookahead on a clone so `1..5` stays a range
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.peek().is_some_and(|c| c.is_ascii_digit()) {
                        has_decimal = true;
                        number.push('.');
                        self.advance();
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }

        Token {
            token_type: TokenType::NumberLiteral,
            lexeme: number,
            position,
            line,
            column,
        }
    }

    fn string(&mut self, quote: char, position: usize, line: usize, column: usize) -> Result<Token> {
        self.advance();
        let mut string = String::new();
        while let Some(c) = self.advance() {
            if c == quote {
                return Ok(Token {
                    token_type: TokenType::StringLiteral,
                    lexeme: string,
                    position,
                    line,
                    column,
                });
            }
            string.push(c);
        }
        Err(self.error("Unterminated string literal"))
    }

    fn simple(&mut self, token_type: TokenType, lexeme: &str, position: usize, line: usize, column: usize) -> Token {
        for _ in lexeme.chars() {
            self.advance();
        }
        Token {
            token_type,
            lexeme: lexeme.to_string(),
            position,
            line,
            column,
        }
    }

    /// Scans the next token
    pub fn scan_token(&mut self) -> Result<Token> {
        self.skip_whitespace();
        let (position, line, column) = (self.position, self.line, self.column);

        let Some(&c) = self.peek() else {
            return Ok(Token {
                token_type: TokenType::EOF,
                lexeme: String::new(),
                position,
                line,
                column,
            });
        };

        let mut ahead = self.chars.clone();
        ahead.next();
        let next = ahead.peek().copied();

        let token = match (c, next) {
            ('=', Some('=')) => self.simple(TokenType::Equal, "==", position, line, column),
            ('=', _) => self.simple(TokenType::Assign, "=", position, line, column),
            ('!', Some('=')) => self.simple(TokenType::NotEqual, "!=", position, line, column),
            ('<', Some('>')) => self.simple(TokenType::NotEqual, "<>", position, line, column),
            ('<', Some('=')) => self.simple(TokenType::LessOrEqual, "<=", position, line, column),
            ('<', _) => self.simple(TokenType::LessThan, "<", position, line, column),
            ('>', Some('=')) => self.simple(TokenType::GreaterOrEqual, ">=", position, line, column),
            ('>', _) => self.simple(TokenType::GreaterThan, ">", position, line, column),
            ('.', Some('.')) => self.simple(TokenType::DotDot, "..", position, line, column),
            ('.', _) => self.simple(TokenType::Dot, ".", position, line, column),
            ('(', _) => self.simple(TokenType::LeftParen, "(", position, line, column),
            (')', _) => self.simple(TokenType::RightParen, ")", position, line, column),
            ('[', _) => self.simple(TokenType::LeftBracket, "[", position, line, column),
            (']', _) => self.simple(TokenType::RightBracket, "]", position, line, column),
            (',', _) => self.simple(TokenType::Comma, ",", position, line, column),
            (':', _) => self.simple(TokenType::Colon, ":", position, line, column),
            ('|', _) => self.simple(TokenType::Pipe, "|", position, line, column),
            ('\'' | '"', _) => self.string(c, position, line, column)?,
            ('-', Some(d)) if d.is_ascii_digit() => self.number(position, line, column),
            (d, _) if d.is_ascii_digit() => self.number(position, line, column),
            (a, _) if a.is_alphabetic() || a == '_' => self.identifier(position, line, column),
            _ => return Err(self.error(format!("Unexpected character '{}'", c))),
        };

        self.previous = Some(token.token_type);
        Ok(token)
    }
}

/// Tokenizes the body of an output or tag
pub fn tokenize(input: &str, line: usize) -> Result<Vec<Token>> {
    let mut lexer = Lexer::new(input, line);
    let mut tokens = Vec::new();

    loop {
        let token = lexer.scan_token()?;
        let is_eof = token.token_type == TokenType::EOF;
        tokens.push(token);

        if is_eof {
            break;
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(input: &str) -> Vec<TokenType> {
        tokenize(input, 1)
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn numeric_path_segments_are_not_decimals() {
        assert_eq!(
            types("PID.3.1"),
            vec![
                TokenType::Identifier,
                TokenType::Dot,
                TokenType::NumberLiteral,
                TokenType::Dot,
                TokenType::NumberLiteral,
                TokenType::EOF
            ]
        );
        let tokens = tokenize("2.5", 1).unwrap();
        assert_eq!(tokens[0].lexeme, "2.5");
    }

    #[test]
    fn ranges_and_keywords() {
        assert_eq!(
            types("(1..n) contains x.empty"),
            vec![
                TokenType::LeftParen,
                TokenType::NumberLiteral,
                TokenType::DotDot,
                TokenType::Identifier,
                TokenType::RightParen,
                TokenType::Contains,
                TokenType::Identifier,
                TokenType::Dot,
                TokenType::Identifier,
                TokenType::EOF
            ]
        );
    }

    #[test]
    fn markup_trimming() {
        let items = split_markup("a  {%- if x -%}\n  b\n{{ y }}").unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].content, "a");
        assert_eq!(items[1].tag_name(), "if");
        assert_eq!(items[2].content, "b\n");
        assert_eq!(items[3].kind, MarkupKind::Output);
    }

    #[test]
    fn raw_and_comment_bodies() {
        let items = split_markup("{% raw %}{{ x }}{% endraw %}{% comment %}{{ y }}{% endcomment %}z").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "{{ x }}");
        assert_eq!(items[1].content, "z");
    }

    #[test]
    fn unterminated_output_is_a_syntax_error() {
        let err = split_markup("{{ x ").unwrap_err();
        assert_eq!(err.code(), FhirConverterErrorCode::TemplateSyntaxError);
    }
}
