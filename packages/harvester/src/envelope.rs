//! Normalization of response bodies into [`PageResponse`].
//!
//! The API answers either with a bare JSON array of records or with an
//! envelope object:
//!
//! ```json
//! {"data": [...], "totalRegistros": 120, "totalPaginas": 3, "numeroPagina": 1, "paginasRestantes": 2}
//! ```
//!
//! Both shapes produce the same records. Missing keys are not errors: an
//! envelope without `data` is an empty page, and missing totals stay `None`.

use serde_json::Value;
use thiserror::Error;

use crate::types::{PageResponse, PageStatus, Record};

/// Keys that may hold the record list, in order of preference.
const RECORD_KEYS: [&str; 2] = ["data", "items"];

const TOTAL_RECORDS_KEY: &str = "totalRegistros";
const TOTAL_PAGES_KEY: &str = "totalPaginas";
const PAGE_NUMBER_KEY: &str = "numeroPagina";
const PAGES_REMAINING_KEY: &str = "paginasRestantes";

/// Why a body could not be normalized.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON array or object, got {0}")]
    UnexpectedShape(&'static str),

    #[error("`{0}` is not an array")]
    RecordsNotArray(&'static str),

    #[error("record at index {0} is not a JSON object")]
    NonObjectRecord(usize),
}

/// Normalize a raw response body.
///
/// An empty (or whitespace-only) body is an empty page.
pub fn normalize_body(body: &[u8]) -> Result<PageResponse, ShapeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PageResponse::empty());
    }
    let value: Value = serde_json::from_slice(body)?;
    normalize_value(value)
}

/// Normalize an already-parsed JSON value.
pub fn normalize_value(value: Value) -> Result<PageResponse, ShapeError> {
    match value {
        Value::Array(items) => Ok(page(into_records(items)?, None, None, None, None)),
        Value::Object(mut envelope) => {
            let records = match take_record_list(&mut envelope)? {
                Some(items) => into_records(items)?,
                None => Vec::new(),
            };
            Ok(page(
                records,
                read_count(&envelope, TOTAL_RECORDS_KEY),
                read_count(&envelope, TOTAL_PAGES_KEY).and_then(|n| u32::try_from(n).ok()),
                read_count(&envelope, PAGE_NUMBER_KEY).and_then(|n| u32::try_from(n).ok()),
                read_count(&envelope, PAGES_REMAINING_KEY).and_then(|n| u32::try_from(n).ok()),
            ))
        }
        Value::Null => Ok(PageResponse::empty()),
        Value::Bool(_) => Err(ShapeError::UnexpectedShape("a boolean")),
        Value::Number(_) => Err(ShapeError::UnexpectedShape("a number")),
        Value::String(_) => Err(ShapeError::UnexpectedShape("a string")),
    }
}

fn page(
    records: Vec<Record>,
    total_records: Option<u64>,
    total_pages: Option<u32>,
    page_number: Option<u32>,
    pages_remaining: Option<u32>,
) -> PageResponse {
    let status = if records.is_empty() {
        PageStatus::Empty
    } else {
        PageStatus::Ok
    };
    PageResponse {
        status,
        records,
        total_records,
        total_pages,
        page_number,
        pages_remaining,
    }
}

fn take_record_list(
    envelope: &mut serde_json::Map<String, Value>,
) -> Result<Option<Vec<Value>>, ShapeError> {
    for key in RECORD_KEYS {
        match envelope.remove(key) {
            Some(Value::Array(items)) => return Ok(Some(items)),
            Some(Value::Null) | None => continue,
            Some(_) => return Err(ShapeError::RecordsNotArray(key)),
        }
    }
    Ok(None)
}

fn into_records(items: Vec<Value>) -> Result<Vec<Record>, ShapeError> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(record) => Ok(record),
            _ => Err(ShapeError::NonObjectRecord(index)),
        })
        .collect()
}

/// Read a non-negative count that may be encoded as a number or a string.
fn read_count(envelope: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    match envelope.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
