use thiserror::Error;

/// An environment variable required by the application is not set.
#[derive(Debug, Error)]
#[error("Missing environment variable: {0}")]
pub struct MissingEnvVarError(pub String);

/// Reads an optional environment variable; unset or empty values are `None`.
pub fn get_optional_env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Reads two variables that only make sense together, such as an API key id
/// and its secret.
///
/// Neither set is `Ok(None)`. Only one set reports the other one as missing.
pub fn get_env_pair(
    first: &str,
    second: &str,
) -> Result<Option<(String, String)>, MissingEnvVarError> {
    match (get_optional_env_var(first), get_optional_env_var(second)) {
        (Some(a), Some(b)) => Ok(Some((a, b))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(MissingEnvVarError(second.to_string())),
        (None, Some(_)) => Err(MissingEnvVarError(first.to_string())),
    }
}
