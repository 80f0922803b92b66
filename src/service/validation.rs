use crate::error::{Error, Result};
use crate::types::ExperimentFields;

const MAX_TITLE_LEN: usize = 200;
const MAX_TAG_NAME_LEN: usize = 50;
const MAX_FILENAME_LEN: usize = 255;

const DEFAULT_TAG_COLOR: &str = "#6b7280";

fn validate_text(value: &str, entity: &str, max_len: usize) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid(format!("{entity} cannot be empty")));
    }
    if value.chars().count() > max_len {
        return Err(Error::invalid(format!(
            "{entity} cannot exceed {max_len} characters"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(Error::invalid(format!(
            "{entity} cannot contain control characters"
        )));
    }
    Ok(())
}

/// Trims the editable fields in place and checks the title.
pub fn normalize_fields(fields: &mut ExperimentFields) -> Result<()> {
    fields.title = fields.title.trim().to_string();
    validate_text(&fields.title, "Experiment title", MAX_TITLE_LEN)?;

    for value in [
        &mut fields.description,
        &mut fields.researcher_name,
        &mut fields.protocol_text,
    ] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            *value = None;
        }
    }

    Ok(())
}

/// Trims a tag name and checks its length.
pub fn normalize_tag_name(name: &str) -> Result<String> {
    let name = name.trim();
    validate_text(name, "Tag name", MAX_TAG_NAME_LEN)?;
    Ok(name.to_string())
}

/// Accepts `#rgb` or `#rrggbb`, lower-cased. Missing colors get the default.
pub fn normalize_color(color: Option<&str>) -> Result<String> {
    let Some(color) = color.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(DEFAULT_TAG_COLOR.to_string());
    };

    let valid = color
        .strip_prefix('#')
        .is_some_and(|hex| matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()));

    if !valid {
        return Err(Error::invalid("Tag color must be #rgb or #rrggbb"));
    }

    Ok(color.to_ascii_lowercase())
}

/// Emails are matched case-insensitively, so they are stored lower-cased.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();

    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty() && !domain.contains('@'));

    if !valid || email.chars().any(char::is_whitespace) {
        return Err(Error::invalid("Invalid email address"));
    }

    Ok(email)
}

pub fn validate_filename(filename: &str) -> Result<()> {
    validate_text(filename, "Filename", MAX_FILENAME_LEN)?;
    if filename.contains(['/', '\\']) {
        return Err(Error::invalid("Filename cannot contain path separators"));
    }
    Ok(())
}
