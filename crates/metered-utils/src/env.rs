//! Environment variable expansion for configuration strings
//!
//! Supports `${VAR}` and `$VAR` syntax so that API keys can stay out of
//! configuration files. `$$` stands for a literal `$`. Substituted values are
//! inserted as-is and never expanded again.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("reference pattern is valid")
});

/// Errors raised while expanding a string
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    /// Referenced variable is not set
    #[error("Environment variable not found: {0}")]
    NotFound(String),
}

/// Resolve environment variable references against the process environment
///
/// # Example
///
/// ```
/// # use metered_utils::resolve_env_string;
/// let plain = resolve_env_string("no references here")?;
/// assert_eq!(plain, "no references here");
/// # Ok::<(), metered_utils::EnvError>(())
/// ```
pub fn resolve_env_string(s: &str) -> Result<String, EnvError> {
    resolve_env_with(s, |name| std::env::var(name).ok())
}

/// Resolve environment variable references using a custom lookup
pub fn resolve_env_with<F>(s: &str, lookup: F) -> Result<String, EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(s.len());
    let mut last = 0;

    for cap in REFERENCE.captures_iter(s) {
        let Some(whole) = cap.get(0) else { continue };
        result.push_str(&s[last..whole.start()]);
        last = whole.end();

        // `$$` is a literal dollar sign
        let Some(name) = cap.get(1).or_else(|| cap.get(2)) else {
            result.push('$');
            continue;
        };
        let value = lookup(name.as_str())
            .ok_or_else(|| EnvError::NotFound(name.as_str().to_string()))?;
        result.push_str(&value);
    }

    result.push_str(&s[last..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "AV_KEY" => Some("demo".to_string()),
            "OTHER" => Some("x1".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_braced_and_bare() {
        assert_eq!(resolve_env_with("${AV_KEY}", lookup).unwrap(), "demo");
        assert_eq!(resolve_env_with("k=$OTHER", lookup).unwrap(), "k=x1");
        assert_eq!(
            resolve_env_with("${AV_KEY}-$OTHER", lookup).unwrap(),
            "demo-x1"
        );
    }

    #[test]
    fn test_missing_variable() {
        let err = resolve_env_with("${MISSING_KEY}", lookup).unwrap_err();
        assert_eq!(err, EnvError::NotFound("MISSING_KEY".to_string()));
    }

    #[test]
    fn test_values_are_not_expanded_twice() {
        let lookup = |name: &str| (name == "K").then(|| "ab$CD".to_string());
        assert_eq!(resolve_env_with("${K}", lookup).unwrap(), "ab$CD");
        assert_eq!(resolve_env_with("$K", lookup).unwrap(), "ab$CD");
    }

    #[test]
    fn test_dollar_escape() {
        assert_eq!(resolve_env_with("pa$$word", lookup).unwrap(), "pa$word");
        assert_eq!(resolve_env_with("$${AV_KEY}", lookup).unwrap(), "${AV_KEY}");
        assert_eq!(resolve_env_with("cost: 5$", lookup).unwrap(), "cost: 5$");
    }

    #[test]
    fn test_literal_passthrough() {
        assert_eq!(resolve_env_with("abc123", lookup).unwrap(), "abc123");
    }
}
