//! Built-in template helpers.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::{Helper, Result, TemplateError, Value};

static NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\r\n]+").expect("valid regex"));

static HTML_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(img|br|hr)[^>]*>|</[a-z]+>|&([a-z]+|#\d+);").expect("valid regex")
});

/// Check whether a string contains HTML markup (line breaks, images,
/// closing tags or entities).
pub fn is_html(text: &str) -> bool {
    HTML_MARKUP.is_match(text)
}

/// Collapse every run of CR/LF characters into a single space.
pub fn strip_newlines(text: &str) -> String {
    NEWLINES.replace_all(text, " ").into_owned()
}

/// The helpers every [`TemplateEngine`](super::TemplateEngine) starts with.
pub(super) fn builtin() -> HashMap<String, Helper> {
    let mut helpers: HashMap<String, Helper> = HashMap::new();
    helpers.insert("or".to_string(), Arc::new(or));
    helpers.insert("ishtml".to_string(), Arc::new(ishtml));
    helpers.insert("noescape".to_string(), Arc::new(noescape));
    helpers.insert("nonewlines".to_string(), Arc::new(nonewlines));
    helpers.insert("trim".to_string(), Arc::new(trim));
    helpers
}

/// First truthy argument, otherwise the last one.
fn or(args: &[Value]) -> Result<Value> {
    let last = args
        .last()
        .ok_or_else(|| TemplateError::Render("or: expected at least 1 argument".to_string()))?;

    Ok(args
        .iter()
        .find(|value| value.is_truthy())
        .unwrap_or(last)
        .clone())
}

fn ishtml(args: &[Value]) -> Result<Value> {
    let value = single("ishtml", args)?;
    Ok(Value::Bool(is_html(&value.to_display_string())))
}

fn noescape(args: &[Value]) -> Result<Value> {
    let value = single("noescape", args)?;
    Ok(Value::Safe(value.to_display_string()))
}

fn nonewlines(args: &[Value]) -> Result<Value> {
    let value = single("nonewlines", args)?;
    Ok(Value::String(strip_newlines(&value.to_display_string())))
}

fn trim(args: &[Value]) -> Result<Value> {
    let value = single("trim", args)?;
    Ok(Value::String(value.to_display_string().trim().to_string()))
}

fn single<'a>(helper: &str, args: &'a [Value]) -> Result<&'a Value> {
    match args {
        [value] => Ok(value),
        _ => Err(TemplateError::Render(format!(
            "{helper}: expected 1 argument, got {}",
            args.len()
        ))),
    }
}
