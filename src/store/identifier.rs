use std::sync::LazyLock;

use regex::Regex;

use crate::error::{StoreError, StoreResult};

// Literal pattern; compiling it cannot fail.
static NON_ALNUM_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("literal regex"));

/// Replace every run of non-alphanumeric characters with a single `_`.
///
/// `"POS 2022 (final)_Sheet1"` becomes `"POS_2022_final_Sheet1"`.
pub fn sanitize_table_name(name: &str) -> String {
    NON_ALNUM_RUN.replace_all(name, "_").into_owned()
}

/// Double-quote an identifier for use in SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Database and schema names become file names and attach aliases, so they are restricted to
/// `[A-Za-z0-9_-]` and may not shadow SQLite's own `main`/`temp`.
pub(crate) fn validate_name(kind: &'static str, name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !name.eq_ignore_ascii_case("main")
        && !name.eq_ignore_ascii_case("temp");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        })
    }
}
