//! Template parser module.
//!
//! Parses template strings into an AST (Abstract Syntax Tree) of nodes.

use std::sync::LazyLock;

use regex::Regex;

use super::{Result, TemplateError};

/// Text ending inside a URL-valued HTML attribute, e.g. `<a href="`.
static URL_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(href|src|action|formaction|cite|poster|background)\s*=\s*["']?$"#)
        .expect("valid regex")
});

/// An expression inside a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Variable reference: `name`, `item.title`, `this`, `@index`
    Path(String),

    /// Quoted literal: `"text"`
    Literal(String),

    /// Helper call: `or a b`, `(ishtml this)`, or a pipeline stage `a | nonewlines`
    Call { helper: String, args: Vec<Expr> },
}

/// A node in the template AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Raw text content.
    Text(String),

    /// Interpolated expression: `{{item.title}}` or `{{or a b}}`
    Expression(Expr),

    /// Expression interpolated into a URL attribute: `<a href="{{item.link}}">`
    Url(Expr),

    /// Conditional block: `{{#if condition}}...{{else}}...{{/if}}`
    If {
        condition: Expr,
        then_branch: Vec<Node>,
        else_branch: Vec<Node>,
    },

    /// Unless block (inverse of if): `{{#unless condition}}...{{/unless}}`
    Unless { condition: Expr, body: Vec<Node> },

    /// With block (scope change): `{{#with value}}...{{/with}}`
    With { value: Expr, body: Vec<Node> },

    /// Loop block: `{{#each items}}...{{/each}}`
    Each { list: Expr, body: Vec<Node> },
}

/// Template parser.
pub struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given input.
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Parse the template into a list of nodes.
    pub fn parse(mut self) -> Result<Vec<Node>> {
        let nodes = self.parse_nodes(None)?;
        if self.pos < self.input.len() {
            let found: String = self.input[self.pos..].chars().take(10).collect();
            return Err(TemplateError::Parse(format!(
                "Unexpected closing tag '{found}'"
            )));
        }
        Ok(nodes)
    }

    /// Parse nodes until reaching a closing tag or end of input.
    fn parse_nodes(&mut self, end_tag: Option<&str>) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();

        while self.pos < self.input.len() {
            if let Some(tag) = end_tag {
                if self.peek_str(&format!("{{{{/{tag}}}}}")) {
                    break;
                }
                if tag == "if" && self.peek_str("{{else}}") {
                    break;
                }
            } else if self.peek_str("{{/") || self.peek_str("{{else}}") {
                break;
            }

            if self.peek_str("\\{{") {
                self.pos += 3;
                nodes.push(Node::Text("{{".to_string()));
            } else if self.peek_str("{{") {
                let node = self.parse_tag()?;
                nodes.push(node);
            } else {
                let text = self.collect_text();
                if !text.is_empty() {
                    nodes.push(Node::Text(text));
                }
            }
        }

        if let Some(tag) = end_tag {
            if self.pos >= self.input.len() {
                return Err(TemplateError::Parse(format!("Unclosed block: {tag}")));
            }
        }

        Ok(nodes)
    }

    /// Parse a single tag.
    fn parse_tag(&mut self) -> Result<Node> {
        let in_url = URL_ATTRIBUTE.is_match(&self.input[..self.pos]);
        self.expect("{{")?;
        self.skip_whitespace();

        if self.peek_char() == Some('#') {
            self.advance();
            self.skip_whitespace();
            return self.parse_block_tag();
        }

        let expr = self.parse_expression()?;
        self.skip_whitespace();
        self.expect("}}")?;

        if in_url {
            Ok(Node::Url(expr))
        } else {
            Ok(Node::Expression(expr))
        }
    }

    /// Parse a block tag (if, unless, with, each).
    fn parse_block_tag(&mut self) -> Result<Node> {
        let tag_name = self.parse_identifier()?;
        self.skip_whitespace();

        match tag_name.as_str() {
            "if" => self.parse_if_block(),
            "unless" => self.parse_unless_block(),
            "with" => self.parse_with_block(),
            "each" => self.parse_each_block(),
            _ => Err(TemplateError::Parse(format!(
                "Unknown block tag: {tag_name}"
            ))),
        }
    }

    fn parse_if_block(&mut self) -> Result<Node> {
        let condition = self.parse_expression()?;
        self.skip_whitespace();
        self.expect("}}")?;

        let then_branch = self.parse_nodes(Some("if"))?;

        let else_branch = if self.peek_str("{{else}}") {
            self.expect("{{else}}")?;
            self.parse_nodes(Some("if"))?
        } else {
            Vec::new()
        };

        self.expect("{{/if}}")?;

        Ok(Node::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_unless_block(&mut self) -> Result<Node> {
        let condition = self.parse_expression()?;
        self.skip_whitespace();
        self.expect("}}")?;

        let body = self.parse_nodes(Some("unless"))?;
        self.expect("{{/unless}}")?;

        Ok(Node::Unless { condition, body })
    }

    fn parse_with_block(&mut self) -> Result<Node> {
        let value = self.parse_expression()?;
        self.skip_whitespace();
        self.expect("}}")?;

        let body = self.parse_nodes(Some("with"))?;
        self.expect("{{/with}}")?;

        Ok(Node::With { value, body })
    }

    fn parse_each_block(&mut self) -> Result<Node> {
        let list = self.parse_term()?;
        self.skip_whitespace();
        self.expect("}}")?;

        let body = self.parse_nodes(Some("each"))?;
        self.expect("{{/each}}")?;

        Ok(Node::Each { list, body })
    }

    /// Parse an expression: a call or term, followed by any number of
    /// `| helper [args...]` pipeline stages.
    fn parse_expression(&mut self) -> Result<Expr> {
        let mut expr = self.parse_call()?;

        loop {
            self.skip_whitespace();
            if self.peek_char() != Some('|') {
                break;
            }
            self.advance();
            self.skip_whitespace();

            let helper = self.parse_identifier()?;
            let mut args = vec![expr];
            args.extend(self.parse_arguments()?);
            expr = Expr::Call { helper, args };
        }

        Ok(expr)
    }

    /// Parse `helper arg...` or a single term.
    fn parse_call(&mut self) -> Result<Expr> {
        let head = self.parse_term()?;

        if let Expr::Path(name) = &head {
            let args = self.parse_arguments()?;
            if !args.is_empty() {
                return Ok(Expr::Call {
                    helper: name.clone(),
                    args,
                });
            }
        }

        Ok(head)
    }

    /// Parse whitespace-separated terms until `}}`, `|` or `)`.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();

        loop {
            let before = self.pos;
            self.skip_whitespace();
            if self.pos == before
                || self.pos >= self.input.len()
                || self.peek_str("}}")
                || matches!(self.peek_char(), Some('|') | Some(')'))
            {
                self.pos = before;
                break;
            }
            args.push(self.parse_term()?);
        }

        Ok(args)
    }

    /// Parse a quoted literal, a parenthesized sub-expression or a path.
    fn parse_term(&mut self) -> Result<Expr> {
        match self.peek_char() {
            Some('"') => Ok(Expr::Literal(self.parse_quoted_string()?)),
            Some('(') => {
                self.advance();
                self.skip_whitespace();
                let expr = self.parse_expression()?;
                self.skip_whitespace();
                self.expect(")")?;
                Ok(expr)
            }
            _ => Ok(Expr::Path(self.parse_identifier()?)),
        }
    }

    /// Parse a quoted string.
    fn parse_quoted_string(&mut self) -> Result<String> {
        self.expect("\"")?;

        let mut value = String::new();
        while self.pos < self.input.len() {
            let ch = self.current_char();
            if ch == '"' {
                self.advance();
                return Ok(value);
            }
            if ch == '\\' && self.pos + 1 < self.input.len() {
                self.advance();
                value.push(self.current_char());
                self.advance();
                continue;
            }
            value.push(ch);
            self.advance();
        }

        Err(TemplateError::Parse("Unterminated string".to_string()))
    }

    /// Parse an identifier (variable name, including dot notation).
    fn parse_identifier(&mut self) -> Result<String> {
        let start = self.pos;

        while self.pos < self.input.len() {
            let ch = self.current_char();
            if ch.is_alphanumeric() || matches!(ch, '_' | '.' | '-' | '@') {
                self.advance();
            } else {
                break;
            }
        }

        if self.pos == start {
            let found: String = self.input[self.pos..].chars().take(10).collect();
            return Err(TemplateError::Parse(format!(
                "Expected identifier but found '{found}'"
            )));
        }

        Ok(self.input[start..self.pos].to_string())
    }

    /// Collect text until the next tag or escape sequence.
    fn collect_text(&mut self) -> String {
        let start = self.pos;

        while self.pos < self.input.len() {
            if self.peek_str("{{") || self.peek_str("\\{{") {
                break;
            }
            self.advance();
        }

        self.input[start..self.pos].to_string()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.current_char().is_whitespace() {
            self.advance();
        }
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn current_char(&self) -> char {
        self.input[self.pos..].chars().next().unwrap_or('\0')
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            self.pos += self.current_char().len_utf8();
        }
    }

    /// Expect a specific string and consume it.
    fn expect(&mut self, s: &str) -> Result<()> {
        if self.peek_str(s) {
            self.pos += s.len();
            Ok(())
        } else {
            let found: String = self.input[self.pos..].chars().take(10).collect();
            Err(TemplateError::Parse(format!(
                "Expected '{s}' but found '{found}'"
            )))
        }
    }
}
