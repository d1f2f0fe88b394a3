// Template Parser
//
// This module implements the parser for templates. Expressions inside outputs
// and tags are parsed by a recursive-descent `Parser` over lexer tokens; the
// block structure (if/for/capture/...) is assembled by `TemplateBuilder` over
// the markup stream.

use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::model::Value;
use crate::template::lexer::{split_markup, tokenize, Markup, MarkupKind, Token, TokenType};

/// Expression AST
#[derive(Debug, Clone)]
pub enum Expression {
    Literal(Value),
    /// Matches values that are `empty`
    Empty,
    /// Matches values that are `blank`
    Blank,
    /// A variable with its accessor chain, e.g. `msg.entry[0].resource`
    Variable {
        name: String,
        path: Vec<Accessor>,
    },
    /// `(start..end)`
    Range(Box<Expression>, Box<Expression>),
}

/// One step of a variable path
#[derive(Debug, Clone)]
pub enum Accessor {
    Property(String),
    Index(Expression),
}

/// A filter application `| name: arg1, arg2`
#[derive(Debug, Clone)]
pub struct FilterCall {
    pub name: String,
    pub arguments: Vec<Expression>,
}

/// An expression followed by a filter chain
#[derive(Debug, Clone)]
pub struct FilteredExpression {
    pub expression: Expression,
    pub filters: Vec<FilterCall>,
}

/// Comparison operators in conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Contains,
}

/// Conditions of `if`, `elsif` and `unless`
#[derive(Debug, Clone)]
pub enum Condition {
    Single(Expression),
    Compare {
        left: Expression,
        op: ComparisonOperator,
        right: Expression,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

/// Template nodes
#[derive(Debug, Clone)]
pub enum Node {
    Text(String),
    Output(FilteredExpression),
    If {
        branches: Vec<(Condition, Vec<Node>)>,
        else_body: Option<Vec<Node>>,
    },
    Unless {
        condition: Condition,
        body: Vec<Node>,
        else_body: Option<Vec<Node>>,
    },
    Case {
        subject: Expression,
        whens: Vec<(Vec<Expression>, Vec<Node>)>,
        else_body: Option<Vec<Node>>,
    },
    For {
        variable: String,
        collection: Expression,
        limit: Option<Expression>,
        offset: Option<Expression>,
        reversed: bool,
        body: Vec<Node>,
        else_body: Option<Vec<Node>>,
    },
    Break,
    Continue,
    Assign {
        name: String,
        value: FilteredExpression,
    },
    Capture {
        name: String,
        body: Vec<Node>,
    },
    /// Inline render of another template
    Include {
        template: Expression,
        arguments: Vec<(String, Expression)>,
    },
    /// Render another template into a variable of the calling scope
    Evaluate {
        variable: String,
        template: Expression,
        arguments: Vec<(String, Expression)>,
    },
    /// Emit the body only if it is JSON valid against the schema
    Validate {
        schema: Expression,
        body: Vec<Node>,
    },
    /// Merge the body, a JSON diff, into the accumulator variable
    MergeDiff {
        variable: String,
        body: Vec<Node>,
    },
}

/// A parsed template
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub nodes: Vec<Node>,
}

impl Template {
    /// Parses template source
    pub fn parse(name: &str, source: &str) -> Result<Template> {
        let markup = split_markup(source).map_err(|e| in_template(name, e))?;
        let mut builder = TemplateBuilder {
            markup: &markup,
            current: 0,
        };
        // With no terminators a stray end tag surfaces as an unknown tag
        let (nodes, _) = builder.block(&[]).map_err(|e| in_template(name, e))?;
        Ok(Template {
            name: name.to_string(),
            nodes,
        })
    }
}

fn in_template(name: &str, error: FhirConverterError) -> FhirConverterError {
    FhirConverterError::template_load(
        error.code(),
        format!("Template '{}': {}", name, error.message()),
    )
}

fn syntax_error(message: impl AsRef<str>, line: usize) -> FhirConverterError {
    FhirConverterError::template_load(
        FhirConverterErrorCode::TemplateSyntaxError,
        format!("{} at line {}", message.as_ref(), line),
    )
}

/// Builds the node tree from the markup stream
struct TemplateBuilder<'a> {
    markup: &'a [Markup],
    current: usize,
}

impl<'a> TemplateBuilder<'a> {
    /// Parses nodes until one of the `terminators` tags (returned) or the end
    /// of input (`None`)
    fn block(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Option<&'a Markup>)> {
        let mut nodes = Vec::new();

        while let Some(item) = self.markup.get(self.current) {
            self.current += 1;
            match item.kind {
                MarkupKind::Text => nodes.push(Node::Text(item.content.clone())),
                MarkupKind::Output => {
                    let tokens = tokenize(&item.content, item.line)?;
                    let mut parser = Parser::new(&tokens);
                    let output = parser.filtered_expression()?;
                    parser.expect_end()?;
                    nodes.push(Node::Output(output));
                }
                MarkupKind::Tag => {
                    let name = item.tag_name();
                    if terminators.contains(&name) {
                        return Ok((nodes, Some(item)));
                    }
                    nodes.push(self.tag(item)?);
                }
            }
        }

        if terminators.is_empty() {
            Ok((nodes, None))
        } else {
            Err(syntax_error(
                format!("Missing '{}' tag", terminators[terminators.len() - 1]),
                self.markup.last().map(|m| m.line).unwrap_or(1),
            ))
        }
    }

    fn tag(&mut self, item: &'a Markup) -> Result<Node> {
        let tokens = tokenize(item.tag_arguments(), item.line)?;
        let mut parser = Parser::new(&tokens);

        let node = match item.tag_name() {
            "if" => self.if_tag(parser.condition()?)?,
            "unless" => {
                let condition = parser.condition()?;
                let (body, end) = self.block(&["else", "endunless"])?;
                let else_body = match end {
                    Some(tag) if tag.tag_name() == "else" => Some(self.block(&["endunless"])?.0),
                    _ => None,
                };
                Node::Unless {
                    condition,
                    body,
                    else_body,
                }
            }
            "case" => self.case_tag(parser.expression()?)?,
            "for" => {
                let variable = parser.identifier("loop variable")?;
                let keyword = parser.identifier("'in'")?;
                if keyword != "in" {
                    return Err(syntax_error("Expected 'in' in for tag", item.line));
                }
                let collection = parser.expression()?;
                let (mut limit, mut offset, mut reversed) = (None, None, false);
                while !parser.is_at_end() {
                    match parser.identifier("loop option")?.as_str() {
                        "limit" => {
                            parser.consume(TokenType::Colon, "Expected ':' after limit")?;
                            limit = Some(parser.expression()?);
                        }
                        "offset" => {
                            parser.consume(TokenType::Colon, "Expected ':' after offset")?;
                            offset = Some(parser.expression()?);
                        }
                        "reversed" => reversed = true,
                        other => {
                            return Err(syntax_error(
                                format!("Unknown for loop option '{}'", other),
                                item.line,
                            ))
                        }
                    }
                    parser.match_token(TokenType::Comma);
                }
                let (body, end) = self.block(&["else", "endfor"])?;
                let else_body = match end {
                    Some(tag) if tag.tag_name() == "else" => Some(self.block(&["endfor"])?.0),
                    _ => None,
                };
                Node::For {
                    variable,
                    collection,
                    limit,
                    offset,
                    reversed,
                    body,
                    else_body,
                }
            }
            "break" => Node::Break,
            "continue" => Node::Continue,
            "assign" => {
                let name = parser.identifier("variable name")?;
                parser.consume(TokenType::Assign, "Expected '=' in assign tag")?;
                Node::Assign {
                    name,
                    value: parser.filtered_expression()?,
                }
            }
            "capture" => {
                let name = parser.identifier("variable name")?;
                Node::Capture {
                    name,
                    body: self.block(&["endcapture"])?.0,
                }
            }
            "include" => {
                let template = parser.expression()?;
                Node::Include {
                    template,
                    arguments: parser.named_arguments()?,
                }
            }
            "evaluate" => {
                let variable = parser.identifier("variable name")?;
                let keyword = parser.identifier("'using'")?;
                if keyword != "using" {
                    return Err(syntax_error("Expected 'using' in evaluate tag", item.line));
                }
                let template = parser.expression()?;
                Node::Evaluate {
                    variable,
                    template,
                    arguments: parser.named_arguments()?,
                }
            }
            "validate" => {
                let schema = parser.expression()?;
                Node::Validate {
                    schema,
                    body: self.block(&["endvalidate"])?.0,
                }
            }
            "mergeDiff" => {
                let variable = parser.identifier("variable name")?;
                Node::MergeDiff {
                    variable,
                    body: self.block(&["endmergeDiff"])?.0,
                }
            }
            other => return Err(syntax_error(format!("Unknown tag '{}'", other), item.line)),
        };

        parser.expect_end()?;
        Ok(node)
    }

    fn if_tag(&mut self, first: Condition) -> Result<Node> {
        let mut branches = Vec::new();
        let mut condition = first;
        loop {
            let (body, end) = self.block(&["elsif", "else", "endif"])?;
            branches.push((condition, body));
            match end {
                Some(tag) if tag.tag_name() == "elsif" => {
                    let tokens = tokenize(tag.tag_arguments(), tag.line)?;
                    let mut parser = Parser::new(&tokens);
                    condition = parser.condition()?;
                    parser.expect_end()?;
                }
                Some(tag) if tag.tag_name() == "else" => {
                    let else_body = self.block(&["endif"])?.0;
                    return Ok(Node::If {
                        branches,
                        else_body: Some(else_body),
                    });
                }
                _ => {
                    return Ok(Node::If {
                        branches,
                        else_body: None,
                    })
                }
            }
        }
    }

    fn case_tag(&mut self, subject: Expression) -> Result<Node> {
        // Anything between `case` and the first `when` is ignored
        let (_, mut end) = self.block(&["when", "else", "endcase"])?;
        let mut whens = Vec::new();
        let mut else_body = None;

        while let Some(tag) = end {
            match tag.tag_name() {
                "when" => {
                    let tokens = tokenize(tag.tag_arguments(), tag.line)?;
                    let mut parser = Parser::new(&tokens);
                    let mut values = vec![parser.expression()?];
                    while parser.match_token(TokenType::Comma) || parser.match_token(TokenType::Or) {
                        values.push(parser.expression()?);
                    }
                    parser.expect_end()?;
                    let (body, next) = self.block(&["when", "else", "endcase"])?;
                    whens.push((values, body));
                    end = next;
                }
                "else" => {
                    let (body, next) = self.block(&["endcase"])?;
                    else_body = Some(body);
                    end = next;
                }
                _ => break,
            }
        }

        Ok(Node::Case {
            subject,
            whens,
            else_body,
        })
    }
}

/// Parser for template expressions
pub struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, current: 0 }
    }

    /// Checks if we've reached the end of the token stream
    fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len() || self.peek().token_type == TokenType::EOF
    }

    /// Returns the current token without advancing
    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    /// Returns the previous token
    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    /// Advances to the next token and returns the consumed one
    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, token_type: TokenType) -> bool {
        !self.is_at_end() && self.peek().token_type == token_type
    }

    /// Consumes the current token if it matches the given type
    fn match_token(&mut self, token_type: TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token> {
        if self.check(token_type) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> FhirConverterError {
        let token = self.peek();
        FhirConverterError::template_load(
            FhirConverterErrorCode::TemplateSyntaxError,
            format!(
                "{} (found '{}') at line {}, column {}",
                message, token.lexeme, token.line, token.column
            ),
        )
    }

    /// Fails unless every token has been consumed
    pub fn expect_end(&self) -> Result<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.error("Unexpected trailing input"))
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String> {
        if self.check(TokenType::Identifier) {
            Ok(self.advance().lexeme.clone())
        } else {
            Err(self.error(&format!("Expected {}", what)))
        }
    }

    /// `expression (| filter (: arg (, arg)*)?)*`
    pub fn filtered_expression(&mut self) -> Result<FilteredExpression> {
        let expression = self.expression()?;
        let mut filters = Vec::new();

        while self.match_token(TokenType::Pipe) {
            let name = self.identifier("filter name")?;
            let mut arguments = Vec::new();
            if self.match_token(TokenType::Colon) {
                arguments.push(self.expression()?);
                while self.match_token(TokenType::Comma) {
                    arguments.push(self.expression()?);
                }
            }
            filters.push(FilterCall { name, arguments });
        }

        Ok(FilteredExpression {
            expression,
            filters,
        })
    }

    /// `name: expr, name: expr` (commas optional)
    pub fn named_arguments(&mut self) -> Result<Vec<(String, Expression)>> {
        let mut arguments = Vec::new();
        while !self.is_at_end() {
            let name = self.identifier("argument name")?;
            self.consume(TokenType::Colon, "Expected ':' after argument name")?;
            arguments.push((name, self.expression()?));
            self.match_token(TokenType::Comma);
        }
        Ok(arguments)
    }

    /// `and` / `or` chains, grouped from the right
    pub fn condition(&mut self) -> Result<Condition> {
        let left = self.comparison()?;
        if self.match_token(TokenType::And) {
            Ok(Condition::And(Box::new(left), Box::new(self.condition()?)))
        } else if self.match_token(TokenType::Or) {
            Ok(Condition::Or(Box::new(left), Box::new(self.condition()?)))
        } else {
            Ok(left)
        }
    }

    fn comparison(&mut self) -> Result<Condition> {
        let left = self.expression()?;
        let op = match self.peek().token_type {
            TokenType::Equal => ComparisonOperator::Equals,
            TokenType::NotEqual => ComparisonOperator::NotEquals,
            TokenType::LessThan => ComparisonOperator::LessThan,
            TokenType::LessOrEqual => ComparisonOperator::LessOrEqual,
            TokenType::GreaterThan => ComparisonOperator::GreaterThan,
            TokenType::GreaterOrEqual => ComparisonOperator::GreaterOrEqual,
            TokenType::Contains => ComparisonOperator::Contains,
            _ => return Ok(Condition::Single(left)),
        };
        self.advance();
        let right = self.expression()?;
        Ok(Condition::Compare { left, op, right })
    }

    /// Literals, ranges and variable paths
    pub fn expression(&mut self) -> Result<Expression> {
        if self.is_at_end() {
            return Err(self.error("Expected expression"));
        }

        let token = self.advance().clone();
        match token.token_type {
            TokenType::StringLiteral => Ok(Expression::Literal(Value::String(token.lexeme))),
            TokenType::NumberLiteral => {
                if token.lexeme.contains('.') {
                    token
                        .lexeme
                        .parse::<f64>()
                        .map(|d| Expression::Literal(Value::Decimal(d)))
                        .map_err(|_| self.error("Invalid number"))
                } else {
                    token
                        .lexeme
                        .parse::<i64>()
                        .map(|i| Expression::Literal(Value::Integer(i)))
                        .map_err(|_| self.error("Invalid number"))
                }
            }
            TokenType::BooleanLiteral => Ok(Expression::Literal(Value::Bool(token.lexeme == "true"))),
            TokenType::Nil => Ok(Expression::Literal(Value::Nil)),
            TokenType::Empty => Ok(Expression::Empty),
            TokenType::Blank => Ok(Expression::Blank),
            TokenType::LeftParen => {
                let start = self.expression()?;
                self.consume(TokenType::DotDot, "Expected '..' in range")?;
                let end = self.expression()?;
                self.consume(TokenType::RightParen, "Expected ')' after range")?;
                Ok(Expression::Range(Box::new(start), Box::new(end)))
            }
            TokenType::Identifier => {
                let path = self.accessors()?;
                Ok(Expression::Variable {
                    name: token.lexeme,
                    path,
                })
            }
            TokenType::LeftBracket => {
                // `["name with spaces"]` as a root variable
                let key = self.consume(TokenType::StringLiteral, "Expected string key")?.lexeme.clone();
                self.consume(TokenType::RightBracket, "Expected ']'")?;
                let path = self.accessors()?;
                Ok(Expression::Variable { name: key, path })
            }
            _ => {
                self.current -= 1;
                Err(self.error("Expected expression"))
            }
        }
    }

    fn accessors(&mut self) -> Result<Vec<Accessor>> {
        let mut path = Vec::new();
        loop {
            if self.match_token(TokenType::Dot) {
                let token = self.advance().clone();
                match token.token_type {
                    TokenType::Identifier | TokenType::NumberLiteral => {
                        path.push(Accessor::Property(token.lexeme))
                    }
                    _ => {
                        self.current -= 1;
                        return Err(self.error("Expected property name after '.'"));
                    }
                }
            } else if self.match_token(TokenType::LeftBracket) {
                let index = self.expression()?;
                self.consume(TokenType::RightBracket, "Expected ']' after index")?;
                path.push(Accessor::Index(index));
            } else {
                return Ok(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filter_chains() {
        let template = Template::parse("t", "{{ PID.5.1 | upcase | append: '-', x }}").unwrap();
        match &template.nodes[0] {
            Node::Output(output) => {
                assert_eq!(output.filters.len(), 2);
                assert_eq!(output.filters[1].arguments.len(), 2);
                match &output.expression {
                    Expression::Variable { name, path } => {
                        assert_eq!(name, "PID");
                        assert_eq!(path.len(), 2);
                    }
                    other => panic!("Expected variable, got {:?}", other),
                }
            }
            other => panic!("Expected output, got {:?}", other),
        }
    }

    #[test]
    fn parses_custom_blocks() {
        let source = "{% evaluate id using 'ID/Patient' PID: seg, type: 'x' %}\
                      {% mergeDiff acc %}{}{% endmergeDiff %}\
                      {% validate 'Schema/a.schema.json' %}{}{% endvalidate %}";
        let template = Template::parse("t", source).unwrap();
        assert_eq!(template.nodes.len(), 3);
        match &template.nodes[0] {
            Node::Evaluate { variable, arguments, .. } => {
                assert_eq!(variable, "id");
                assert_eq!(arguments.len(), 2);
            }
            other => panic!("Expected evaluate, got {:?}", other),
        }
    }

    #[test]
    fn unclosed_block_is_a_syntax_error() {
        let err = Template::parse("t", "{% if x %}a").unwrap_err();
        assert_eq!(err.code(), FhirConverterErrorCode::TemplateSyntaxError);
        assert!(err.message().contains("endif"));
    }

    #[test]
    fn stray_end_tag_is_a_syntax_error() {
        let err = Template::parse("t", "a{% endfor %}").unwrap_err();
        assert_eq!(err.code(), FhirConverterErrorCode::TemplateSyntaxError);
    }
}
