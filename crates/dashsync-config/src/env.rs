use regex::{Captures, Regex};
use std::env;
use std::sync::OnceLock;

use crate::ConfigError;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("static regex")
    })
}

/// Interpolate environment variables in a string.
///
/// `${NAME}` is replaced by the variable's value and is an error when unset.
/// `${NAME:-fallback}` uses `fallback` when the variable is unset or empty.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let mut missing = Vec::new();

    let result = placeholder().replace_all(input, |cap: &Captures<'_>| {
        let name = &cap[1];
        let value = env::var(name).ok();
        match (value, cap.get(2)) {
            (Some(v), Some(fallback)) if v.is_empty() => fallback.as_str().to_string(),
            (Some(v), _) => v,
            (None, Some(fallback)) => fallback.as_str().to_string(),
            (None, None) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(result.into_owned())
}
