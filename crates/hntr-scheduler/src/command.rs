//! Command template expansion.

use hntr_core::validate::PLACEHOLDER;
use hntr_core::{HntrError, Result};

/// Substitute the shell-quoted datum for every `{data}` in `template`.
///
/// The template is operator-written and used as is; the datum is never
/// interpreted by the shell.
pub fn build_command(template: &str, datum: &str) -> Result<String> {
    let quoted = shlex::try_quote(datum)
        .map_err(|e| HntrError::Validation(format!("datum cannot be quoted: {e}")))?;
    Ok(template.replace(PLACEHOLDER, &quoted))
}
