//! Template engine for feedmail.
//!
//! Provides a Handlebars-style template engine used for identity
//! expressions, the email sender, the subject and the HTML body.
//!
//! # Features
//!
//! - Variable expansion: `{{item.title}}`
//! - Helper calls: `{{or item.guid item.link}}`, sub-expressions `(ishtml this)`
//! - Pipelines: `{{item.title | nonewlines}}`
//! - Conditionals: `{{#if condition}}...{{else}}...{{/if}}`, `{{#unless ...}}`
//! - Scoping: `{{#with value}}...{{/with}}`
//! - Loops: `{{#each items}}...{{/each}}`
//! - Escaping: `\{{` to output literal `{{`
//!
//! Helpers are registered on the [`TemplateEngine`] when it is built. A
//! template that calls an unknown helper fails to compile, so a broken
//! configuration is rejected before any feed is fetched.
//!
//! # Example
//!
//! ```
//! use feedmail::template::{TemplateContext, TemplateEngine, Value};
//!
//! let engine = TemplateEngine::new();
//! let template = engine.compile("Hello, {{name | nonewlines}}!").unwrap();
//!
//! let mut context = TemplateContext::new();
//! context.set("name", Value::string("World"));
//!
//! assert_eq!(template.render(&context).unwrap(), "Hello, World!");
//! ```

mod helpers;
mod parser;
mod renderer;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use helpers::{is_html, strip_newlines};
pub use parser::{Expr, Node, Parser};
pub use renderer::Renderer;

/// Template-related errors.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Template references a helper that was never registered.
    #[error("Unknown helper: {0}")]
    UnknownHelper(String),

    /// Render error.
    #[error("Render error: {0}")]
    Render(String),
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// A value that can be used in templates.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string value.
    String(String),
    /// A string that is already safe to embed in HTML output.
    Safe(String),
    /// A numeric value.
    Number(i64),
    /// A boolean value.
    Bool(bool),
    /// A list of values.
    List(Vec<Value>),
    /// An object (key-value pairs).
    Object(HashMap<String, Value>),
    /// A null/empty value.
    Null,
}

impl Value {
    /// Convert the value to a string for display.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) | Value::Safe(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::List(_) => "[list]".to_string(),
            Value::Object(_) => "[object]".to_string(),
            Value::Null => "".to_string(),
        }
    }

    /// Check if the value is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::String(s) | Value::Safe(s) => !s.is_empty(),
            Value::Number(n) => *n != 0,
            Value::Bool(b) => *b,
            Value::List(l) => !l.is_empty(),
            Value::Object(o) => !o.is_empty(),
            Value::Null => false,
        }
    }

    /// Get a nested value by dot-separated path.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;

        for part in path.split('.') {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::List(list) => {
                    let index: usize = part.parse().ok()?;
                    current = list.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// Create a Value from a string.
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Create a Value from an optional string, mapping `None` to `Null`.
    pub fn optional(s: Option<impl Into<String>>) -> Self {
        s.map(|s| Value::String(s.into())).unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// Context for template rendering.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    variables: HashMap<String, Value>,
}

impl TemplateContext {
    /// Create an empty template context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable in the context.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Get a variable from the context.
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.variables.get(name) {
            return Some(value);
        }

        // Dot-notation path lookup
        let (root, rest) = name.split_once('.')?;
        self.variables.get(root)?.get_path(rest)
    }

    /// Create a child context that inherits all variables from the parent.
    pub fn child(&self) -> Self {
        self.clone()
    }
}

/// A helper function callable from templates.
pub type Helper = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Template engine: owns the helper registry and compiles templates.
#[derive(Clone)]
pub struct TemplateEngine {
    helpers: Arc<HashMap<String, Helper>>,
}

impl TemplateEngine {
    /// Create a template engine with the built-in helpers registered
    /// (`or`, `ishtml`, `noescape`, `nonewlines`, `trim`).
    pub fn new() -> Self {
        Self {
            helpers: Arc::new(helpers::builtin()),
        }
    }

    /// Register an additional helper. Replaces a helper with the same name.
    pub fn with_helper<F>(mut self, name: impl Into<String>, helper: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.helpers).insert(name.into(), Arc::new(helper));
        self
    }

    /// Check if a helper is registered.
    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Compile a plain-text template.
    pub fn compile(&self, content: &str) -> Result<CompiledTemplate> {
        self.compile_with(content, false)
    }

    /// Compile an HTML template: interpolated values are escaped unless
    /// they were marked safe (e.g. with `noescape`).
    pub fn compile_html(&self, content: &str) -> Result<CompiledTemplate> {
        self.compile_with(content, true)
    }

    fn compile_with(&self, content: &str, escape_html: bool) -> Result<CompiledTemplate> {
        let nodes = Parser::new(content).parse()?;
        self.check_helpers(&nodes)?;

        Ok(CompiledTemplate {
            source: content.to_string(),
            nodes: Arc::new(nodes),
            helpers: Arc::clone(&self.helpers),
            escape_html,
        })
    }

    fn check_helpers(&self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(_) => {}
                Node::Expression(expr) | Node::Url(expr) => self.check_expr(expr)?,
                Node::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    self.check_expr(condition)?;
                    self.check_helpers(then_branch)?;
                    self.check_helpers(else_branch)?;
                }
                Node::Unless { condition, body } => {
                    self.check_expr(condition)?;
                    self.check_helpers(body)?;
                }
                Node::With { value, body } => {
                    self.check_expr(value)?;
                    self.check_helpers(body)?;
                }
                Node::Each { list, body } => {
                    self.check_expr(list)?;
                    self.check_helpers(body)?;
                }
            }
        }
        Ok(())
    }

    fn check_expr(&self, expr: &Expr) -> Result<()> {
        if let Expr::Call { helper, args } = expr {
            if !self.has_helper(helper) {
                return Err(TemplateError::UnknownHelper(helper.clone()));
            }
            for arg in args {
                self.check_expr(arg)?;
            }
        }
        Ok(())
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.helpers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TemplateEngine")
            .field("helpers", &names)
            .finish()
    }
}

/// A parsed template bound to the helper registry it was compiled with.
#[derive(Clone)]
pub struct CompiledTemplate {
    source: String,
    nodes: Arc<Vec<Node>>,
    helpers: Arc<HashMap<String, Helper>>,
    escape_html: bool,
}

impl CompiledTemplate {
    /// Render the template with the given context.
    pub fn render(&self, context: &TemplateContext) -> Result<String> {
        Renderer::new(context, &self.helpers, self.escape_html).render(&self.nodes)
    }

    /// The template text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("source", &self.source)
            .field("escape_html", &self.escape_html)
            .finish()
    }
}
