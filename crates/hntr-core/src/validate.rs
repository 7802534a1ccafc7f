//! Boundary validation for boxes, tags and automation definitions.
//! Everything here runs before a record, automation or job reaches storage.

use crate::error::{HntrError, Result};

/// Substitution token inside a command template.
pub const PLACEHOLDER: &str = "{data}";
pub const MAX_TAGS: usize = 10;
pub const MAX_TAG_LEN: usize = 50;
pub const MAX_CONTAINERS: usize = 5;
pub const MIN_CONTAINER_LEN: usize = 2;
pub const MAX_CONTAINER_LEN: usize = 25;
pub const MIN_BOX_NAME_LEN: usize = 2;
pub const MAX_BOX_NAME_LEN: usize = 25;
pub const MAX_NAME_LEN: usize = 100;
/// Largest page a record listing returns.
pub const LIMIT_MAX: usize = 50_000;

/// Drop empty tags, de-duplicate and sort; tags are a set.
pub fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    cleaned.sort();
    cleaned.dedup();
    cleaned
}

/// Split a comma separated tag list (`a,b,,c`).
pub fn split_tags(raw: &str) -> Vec<String> {
    clean_tags(raw.split(',').map(str::to_string).collect())
}

pub fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS {
        return Err(HntrError::Validation(format!(
            "too many tags. MAX_TAGS={MAX_TAGS}"
        )));
    }
    if let Some(t) = tags.iter().find(|t| t.chars().count() > MAX_TAG_LEN) {
        return Err(HntrError::Validation(format!(
            "tag '{t}' exceeds {MAX_TAG_LEN} characters"
        )));
    }
    Ok(())
}

/// A template may reference the datum at most once; zero references
/// means the command ignores the datum.
pub fn validate_command_template(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(HntrError::Validation("command must not be empty".into()));
    }
    if command.matches(PLACEHOLDER).count() > 1 {
        return Err(HntrError::Validation(format!(
            "command must contain {PLACEHOLDER} at most once"
        )));
    }
    Ok(())
}

pub fn validate_container_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if !(MIN_CONTAINER_LEN..=MAX_CONTAINER_LEN).contains(&len) {
        return Err(HntrError::Validation(format!(
            "container '{name}' must be {MIN_CONTAINER_LEN}-{MAX_CONTAINER_LEN} characters"
        )));
    }
    Ok(())
}

/// Lower-case, validate and de-duplicate container names (order kept).
pub fn normalize_containers(containers: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(containers.len());
    for c in containers {
        let c = c.trim().to_lowercase();
        validate_container_name(&c)?;
        if !out.contains(&c) {
            out.push(c);
        }
    }
    if out.is_empty() || out.len() > MAX_CONTAINERS {
        return Err(HntrError::Validation(format!(
            "a box needs 1-{MAX_CONTAINERS} containers"
        )));
    }
    Ok(out)
}

pub fn validate_box_name(name: &str) -> Result<()> {
    let len = name.trim().chars().count();
    if !(MIN_BOX_NAME_LEN..=MAX_BOX_NAME_LEN).contains(&len) {
        return Err(HntrError::Validation(format!(
            "box name must be {MIN_BOX_NAME_LEN}-{MAX_BOX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Out-of-range page sizes fall back to the maximum.
pub fn clamp_limit(limit: usize) -> usize {
    if limit < 1 || limit > LIMIT_MAX {
        LIMIT_MAX
    } else {
        limit
    }
}
