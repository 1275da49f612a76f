//! Validation of untrusted command parameters.
//!
//! Spawn sizes are clamped into range; resize sizes are rejected outright
//! when out of range. Write payloads must be text and under the length cap.
//! The child environment loses every dynamic-linker injection variable.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::config::TerminalConfig;
use crate::error::ValidationError;

/// Environment variables never passed to a spawned shell.
pub const ENV_DENYLIST: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "LD_PROFILE",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "DYLD_FALLBACK_LIBRARY_PATH",
    "DYLD_FALLBACK_FRAMEWORK_PATH",
];

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

/// Inclusive dimension bounds plus the spawn defaults.
#[derive(Debug, Clone, Copy)]
pub struct SizeLimits {
    pub min_cols: u16,
    pub max_cols: u16,
    pub min_rows: u16,
    pub max_rows: u16,
    pub default: TermSize,
}

impl From<&TerminalConfig> for SizeLimits {
    fn from(cfg: &TerminalConfig) -> Self {
        Self {
            min_cols: cfg.min_cols,
            max_cols: cfg.max_cols,
            min_rows: cfg.min_rows,
            max_rows: cfg.max_rows,
            default: TermSize {
                cols: cfg.default_cols,
                rows: cfg.default_rows,
            },
        }
    }
}

/// Result of [`clamp_spawn_size`]: the size to use and whether any field
/// had to be moved into range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clamped {
    pub size: TermSize,
    pub adjusted: bool,
}

/// Size for `terminal.spawn`. Missing or non-numeric fields take the
/// default; numbers are truncated and clamped into range.
pub fn clamp_spawn_size(payload: &Value, limits: &SizeLimits) -> Clamped {
    let (cols, cols_adjusted) = clamp_field(
        finite(payload.get("cols")),
        limits.default.cols,
        limits.min_cols,
        limits.max_cols,
    );
    let (rows, rows_adjusted) = clamp_field(
        finite(payload.get("rows")),
        limits.default.rows,
        limits.min_rows,
        limits.max_rows,
    );
    Clamped {
        size: TermSize { cols, rows },
        adjusted: cols_adjusted || rows_adjusted,
    }
}

/// Size for `terminal.resize`. Both fields must be finite numbers inside
/// the range; anything else rejects the whole call.
pub fn validate_resize(payload: &Value, limits: &SizeLimits) -> Result<TermSize, ValidationError> {
    let cols = strict_field(payload.get("cols"), "cols", limits.min_cols, limits.max_cols)?;
    let rows = strict_field(payload.get("rows"), "rows", limits.min_rows, limits.max_rows)?;
    Ok(TermSize { cols, rows })
}

/// Text for `terminal.write`: a string of at most `max_chars` characters.
pub fn validate_input(payload: &Value, max_chars: usize) -> Result<&str, ValidationError> {
    let text = payload
        .as_str()
        .ok_or(ValidationError::NotText { field: "data" })?;
    let len = text.chars().count();
    if len > max_chars {
        return Err(ValidationError::TooLong {
            field: "data",
            len,
            max: max_chars,
        });
    }
    Ok(text)
}

/// Copy `vars`, dropping every name in [`ENV_DENYLIST`].
pub fn scrub_env<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(name, _)| !ENV_DENYLIST.contains(&name.as_str()))
        .collect()
}

fn finite(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|v| v.is_finite())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_field(value: Option<f64>, default: u16, min: u16, max: u16) -> (u16, bool) {
    let Some(v) = value else {
        return (default.clamp(min, max), false);
    };
    let v = v.trunc();
    if v < f64::from(min) {
        (min, true)
    } else if v > f64::from(max) {
        (max, true)
    } else {
        (v as u16, false)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn strict_field(
    value: Option<&Value>,
    field: &'static str,
    min: u16,
    max: u16,
) -> Result<u16, ValidationError> {
    let v = finite(value).ok_or(ValidationError::NotANumber { field })?;
    let v = v.trunc();
    if v < f64::from(min) || v > f64::from(max) {
        return Err(ValidationError::OutOfRange {
            field,
            value: v.to_string(),
            min,
            max,
        });
    }
    Ok(v as u16)
}
