use crate::domain::naming::RenameRule;
use crate::utils::error::{BatchError, Result};
use std::path::Path;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field: &str, value: impl ToString, reason: impl Into<String>) -> BatchError {
    BatchError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

pub fn validate_path(field: &str, path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(invalid(field, path, "Path cannot be empty"));
    }
    if path.contains('\0') {
        return Err(invalid(field, path, "Path contains null bytes"));
    }
    Ok(())
}

/// 資料庫與 metadata 檔都是 JSON
pub fn validate_json_file(field: &str, path: &str) -> Result<()> {
    validate_path(field, path)?;
    let is_json = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json {
        return Err(invalid(field, path, "Expected a .json file"));
    }
    Ok(())
}

pub fn validate_at_least(field: &str, value: usize, min: usize) -> Result<()> {
    if value < min {
        return Err(invalid(field, value, format!("Value must be at least {}", min)));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(
            field,
            value,
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| BatchError::MissingConfigError {
        field: field.to_string(),
    })
}

/// A rename rule must stay inside the target directory and only use known
/// tokens. An empty rule is allowed.
pub fn validate_rename_rule(field: &str, rule: &RenameRule) -> Result<()> {
    let template = rule.template().trim();
    if template.starts_with('/') {
        return Err(invalid(field, template, "Rule must be a relative path"));
    }
    if template.split('/').any(|segment| segment.trim() == "..") {
        return Err(invalid(field, template, "Rule cannot leave the target directory"));
    }
    let unknown = rule.unknown_tokens();
    if !unknown.is_empty() {
        return Err(invalid(
            field,
            template,
            format!("Unknown tokens: ${}", unknown.join(", $")),
        ));
    }
    Ok(())
}
