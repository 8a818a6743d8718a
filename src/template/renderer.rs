//! Template renderer module.
//!
//! Renders parsed template nodes with the given context.

use std::collections::HashMap;

use super::parser::{Expr, Node};
use super::{Helper, Result, TemplateContext, TemplateError, Value};

/// Template renderer.
pub struct Renderer<'a> {
    context: &'a TemplateContext,
    helpers: &'a HashMap<String, Helper>,
    escape_html: bool,
}

impl<'a> Renderer<'a> {
    /// Create a new renderer with the given context and helper registry.
    pub fn new(
        context: &'a TemplateContext,
        helpers: &'a HashMap<String, Helper>,
        escape_html: bool,
    ) -> Self {
        Self {
            context,
            helpers,
            escape_html,
        }
    }

    /// Render a list of nodes to a string.
    pub fn render(&self, nodes: &[Node]) -> Result<String> {
        let mut output = String::new();

        for node in nodes {
            output.push_str(&self.render_node(node)?);
        }

        Ok(output)
    }

    fn render_node(&self, node: &Node) -> Result<String> {
        match node {
            Node::Text(text) => Ok(text.clone()),
            Node::Expression(expr) => self.render_expression(expr),
            Node::Url(expr) if self.escape_html => {
                let url = self.evaluate(expr)?.to_display_string();
                Ok(escape_html(filter_url(&url)))
            }
            Node::Url(expr) => self.render_expression(expr),
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.render(then_branch)
                } else {
                    self.render(else_branch)
                }
            }
            Node::Unless { condition, body } => {
                if self.evaluate(condition)?.is_truthy() {
                    Ok(String::new())
                } else {
                    self.render(body)
                }
            }
            Node::With { value, body } => self.render_with(value, body),
            Node::Each { list, body } => self.render_each(list, body),
        }
    }

    /// Evaluate an expression to a value.
    pub fn evaluate(&self, expr: &Expr) -> Result<Value> {
        match expr {
            // Missing variables render empty (like Handlebars)
            Expr::Path(name) => Ok(self.context.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Literal(text) => Ok(Value::String(text.clone())),
            Expr::Call { helper, args } => {
                let function = self
                    .helpers
                    .get(helper)
                    .ok_or_else(|| TemplateError::UnknownHelper(helper.clone()))?;
                let values = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>>>()?;
                function(&values)
            }
        }
    }

    fn render_expression(&self, expr: &Expr) -> Result<String> {
        let value = self.evaluate(expr)?;
        match value {
            Value::Safe(text) => Ok(text),
            other if self.escape_html => Ok(escape_html(&other.to_display_string())),
            other => Ok(other.to_display_string()),
        }
    }

    /// Render a with block. Falsy values skip the body entirely.
    fn render_with(&self, value: &Expr, body: &[Node]) -> Result<String> {
        let value = self.evaluate(value)?;
        if !value.is_truthy() {
            return Ok(String::new());
        }

        let mut child_context = self.context.child();

        // If value is an object, expose its fields directly
        if let Value::Object(obj) = &value {
            for (key, val) in obj {
                child_context.set(key.clone(), val.clone());
            }
        }

        child_context.set("this", value);

        Renderer::new(&child_context, self.helpers, self.escape_html).render(body)
    }

    fn render_each(&self, list: &Expr, body: &[Node]) -> Result<String> {
        let items = match self.evaluate(list)? {
            Value::List(items) => items,
            Value::Null => return Ok(String::new()),
            _ => {
                return Err(TemplateError::Render(format!("'{list:?}' is not a list")));
            }
        };

        let mut output = String::new();
        for (index, item) in items.iter().enumerate() {
            let mut child_context = self.context.child();
            child_context.set("this", item.clone());
            child_context.set("@index", Value::Number(index as i64));
            child_context.set("@first", Value::Bool(index == 0));
            child_context.set("@last", Value::Bool(index == items.len() - 1));

            if let Value::Object(obj) = item {
                for (key, value) in obj {
                    child_context.set(key.clone(), value.clone());
                }
            }

            let child_renderer = Renderer::new(&child_context, self.helpers, self.escape_html);
            output.push_str(&child_renderer.render(body)?);
        }

        Ok(output)
    }
}

/// Replacement for URLs with a scheme other than http, https or mailto.
pub const UNSAFE_URL: &str = "#ZgotmplZ";

/// Pass relative and http(s)/mailto URLs through; replace anything else.
pub fn filter_url(url: &str) -> &str {
    let trimmed = url.trim_start();
    if let Some(colon) = trimmed.find(':') {
        if !trimmed[..colon].contains('/') {
            let scheme = trimmed[..colon].to_ascii_lowercase();
            if !matches!(scheme.as_str(), "http" | "https" | "mailto") {
                return UNSAFE_URL;
            }
        }
    }
    url
}

/// Escape text for inclusion in HTML content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
