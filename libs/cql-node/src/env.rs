//! Environment-driven settings shared by the library and the runner.

use crate::error::ConfigError;
use std::env;
use std::str::FromStr;

/// Deployment environment selected by `APP_ENV`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Reads `APP_ENV`; anything other than "production" means development
    pub fn from_env() -> Self {
        let value = env_or_default("APP_ENV", "development");
        if value.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Value of `key`, or `default` when unset
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Value of `key`, or [`ConfigError::MissingEnvVar`]
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse `key` into `T`, falling back to `default` when unset
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Value of `key` if set and non-blank
pub fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert!(Environment::from_env().is_production());
        });
        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert!(!Environment::from_env().is_production());
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("CQL_NODE_MISSING", || {
            let err = env_required("CQL_NODE_MISSING").unwrap_err();
            assert!(err.to_string().contains("CQL_NODE_MISSING"));
        });
    }

    #[test]
    fn test_env_parse() {
        temp_env::with_var("CQL_NODE_PORT", Some(" 9142 "), || {
            assert_eq!(env_parse("CQL_NODE_PORT", 9042u16), Ok(9142));
        });
        temp_env::with_var_unset("CQL_NODE_PORT", || {
            assert_eq!(env_parse("CQL_NODE_PORT", 9042u16), Ok(9042));
        });
        temp_env::with_var("CQL_NODE_PORT", Some("not-a-port"), || {
            let err = env_parse("CQL_NODE_PORT", 9042u16).unwrap_err();
            assert!(
                matches!(err, ConfigError::ParseError { ref key, .. } if key == "CQL_NODE_PORT")
            );
        });
    }

    #[test]
    fn test_env_optional_blank_is_none() {
        temp_env::with_var("CQL_NODE_USER", Some("  "), || {
            assert_eq!(env_optional("CQL_NODE_USER"), None);
        });
        temp_env::with_var("CQL_NODE_USER", Some("cassandra"), || {
            assert_eq!(env_optional("CQL_NODE_USER").as_deref(), Some("cassandra"));
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var_unset("CQL_NODE_KEYSPACE", || {
            assert_eq!(env_or_default("CQL_NODE_KEYSPACE", "system"), "system");
        });
        temp_env::with_var("CQL_NODE_KEYSPACE", Some("flows"), || {
            assert_eq!(env_or_default("CQL_NODE_KEYSPACE", "system"), "flows");
        });
    }
}
