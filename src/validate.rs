//! Field validation, applied before any network call.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ValidationError;

pub const NAME_MAX_LEN: usize = 100;
pub const DESCRIPTION_MAX_LEN: usize = 500;

/// Predefined list colors; the first entry is the default when a list is
/// created without one.
pub const COLOR_PALETTE: [&str; 10] = [
    "#3B82F6", // Blue
    "#EF4444", // Red
    "#10B981", // Green
    "#F59E0B", // Yellow
    "#8B5CF6", // Purple
    "#F97316", // Orange
    "#06B6D4", // Cyan
    "#84CC16", // Lime
    "#EC4899", // Pink
    "#6B7280", // Gray
];

static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^#[0-9A-Fa-f]{6}$").expect("valid color regex"));

pub fn default_color() -> &'static str {
    COLOR_PALETTE[0]
}

pub fn validate_list_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if len == 0 {
        return Err(ValidationError::NameRequired);
    }
    if len > NAME_MAX_LEN {
        return Err(ValidationError::NameTooLong { len });
    }
    Ok(())
}

pub fn validate_description(description: Option<&str>) -> Result<(), ValidationError> {
    if let Some(desc) = description {
        let len = desc.chars().count();
        if len > DESCRIPTION_MAX_LEN {
            return Err(ValidationError::DescriptionTooLong { len });
        }
    }
    Ok(())
}

pub fn validate_color(color: Option<&str>) -> Result<(), ValidationError> {
    if let Some(value) = color {
        if !COLOR_RE.is_match(value) {
            return Err(ValidationError::InvalidColor {
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_task_title(title: &str) -> Result<(), ValidationError> {
    if title.is_empty() {
        return Err(ValidationError::TitleRequired);
    }
    Ok(())
}
