//! `${env:NAME}` substitution for configuration values.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{env:([\w-]+)\}").expect("valid env placeholder pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpolationError {
    #[error("Missing environment variable: {name}")]
    MissingEnvVar { name: String },
}

/// Replaces every `${env:NAME}` placeholder with the value of `NAME`.
///
/// Values are never logged. Text without placeholders is returned unchanged.
pub fn interpolate_string(value: &str) -> Result<String, InterpolationError> {
    let mut resolved = Vec::new();
    for captures in ENV_PLACEHOLDER.captures_iter(value) {
        let var_name = captures[1].to_string();
        let env_value = std::env::var(&var_name).map_err(|_| InterpolationError::MissingEnvVar { name: var_name.clone() })?;
        debug!("Interpolated env var: {} -> [REDACTED]", var_name);
        resolved.push((captures[0].to_string(), env_value));
    }

    let mut result = value.to_string();
    for (placeholder, env_value) in resolved {
        result = result.replace(&placeholder, &env_value);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_env_placeholders() {
        temp_env::with_var("CLAIMCHAIN_TEST_HOOK", Some("T000/B000/xyz"), || {
            let value = interpolate_string("https://hooks.slack.com/services/${env:CLAIMCHAIN_TEST_HOOK}").unwrap();
            assert_eq!(value, "https://hooks.slack.com/services/T000/B000/xyz");
        });
    }

    #[test]
    fn reports_missing_variables() {
        temp_env::with_var_unset("CLAIMCHAIN_TEST_MISSING", || {
            let error = interpolate_string("${env:CLAIMCHAIN_TEST_MISSING}").unwrap_err();
            assert_eq!(
                error,
                InterpolationError::MissingEnvVar {
                    name: "CLAIMCHAIN_TEST_MISSING".to_string()
                }
            );
        });
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(interpolate_string("#platform-alerts").unwrap(), "#platform-alerts");
    }
}
