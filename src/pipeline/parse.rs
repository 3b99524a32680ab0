//! Model response → [`Digest`].
//!
//! Models asked for "only JSON" still wrap it in Markdown fences, answer
//! `null` for fields they could not find, or write `"$1,200.00"` where a
//! number was requested. Parsing is therefore split in two:
//!
//! 1. the text must be a JSON object, or the whole response is rejected with
//!    [`ItemError::MalformedResponse`];
//! 2. every field inside it is coerced, never rejected: missing or unusable
//!    strings become `""`, numbers become `0`, line items default the same way.

use crate::error::ItemError;
use crate::output::{Digest, LineItem};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use tracing::debug;

/// Strip a surrounding Markdown code fence.
///
/// When the trimmed text starts with ```` ``` ````, its first and last lines
/// (the opening and closing fence) are dropped; otherwise the text is
/// returned trimmed.
pub fn sanitize_response(raw: &str) -> Cow<'_, str> {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return Cow::Borrowed(trimmed);
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() <= 2 {
        return Cow::Owned(String::new());
    }
    Cow::Owned(lines[1..lines.len() - 1].join("\n"))
}

/// Parse a raw model answer into a fully defaulted [`Digest`].
pub fn parse_digest(raw: &str) -> Result<Digest, ItemError> {
    let text = sanitize_response(raw);
    let value: Value = serde_json::from_str(&text).map_err(|e| ItemError::MalformedResponse {
        detail: format!("{e} (response starts with {:?})", preview(&text)),
    })?;
    let obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(ItemError::MalformedResponse {
                detail: format!("expected a JSON object, got {}", kind(&other)),
            })
        }
    };

    let line_items = match obj.get("line_items") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(fields) => Some(line_item(fields)),
                other => {
                    debug!("skipping line item that is a JSON {}", kind(other));
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(Digest {
        invoice_number: string_field(&obj, "invoice_number"),
        invoice_date: string_field(&obj, "invoice_date"),
        due_date: string_field(&obj, "due_date"),
        total_amount: number_field(&obj, "total_amount"),
        line_items,
    })
}

fn line_item(fields: &Map<String, Value>) -> LineItem {
    LineItem {
        description: string_field(fields, "description"),
        quantity: number_field(fields, "quantity"),
        unit_price: number_field(fields, "unit_price"),
        total_price: number_field(fields, "total_price"),
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn number_field(obj: &Map<String, Value>, key: &str) -> f64 {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()).unwrap_or(0.0),
        Some(Value::String(s)) => parse_amount(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Currency symbols, codes, spaces and apostrophe digit grouping.
static RE_AMOUNT_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s_'\u{00A0}]|[A-Za-z]{3}$|^[A-Za-z]{3}|[$€£¥₹zł]").unwrap());

/// `1,234` / `1.234.567`: groups of exactly three digits after the first.
static RE_GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?\d{1,3}([.,]\d{3})+$").unwrap());

/// Lenient number parsing for string-typed amounts like `"1,200.50 USD"`.
///
/// When both `.` and `,` appear, the last one is the decimal mark. A lone
/// separator followed by exactly three digits groups thousands; any other
/// lone comma is a decimal comma (`"1,50"` is 1.5).
fn parse_amount(s: &str) -> Option<f64> {
    let cleaned = RE_AMOUNT_NOISE.replace_all(s.trim(), "");
    let normalised = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if dot > comma => cleaned.replace(',', ""),
        (Some(_), Some(_)) => cleaned.replace('.', "").replace(',', "."),
        (_, Some(_)) if RE_GROUPED.is_match(&cleaned) => cleaned.replace(',', ""),
        (_, Some(_)) if cleaned.matches(',').count() == 1 => cleaned.replace(',', "."),
        (_, Some(_)) => return None,
        (Some(_), None) if cleaned.matches('.').count() > 1 && RE_GROUPED.is_match(&cleaned) => {
            cleaned.replace('.', "")
        }
        (_, None) => cleaned.into_owned(),
    };
    normalised.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn preview(s: &str) -> String {
    s.chars().take(40).collect()
}
