use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

use crate::error::ConfigError;

pub const DEFAULT_TOPIC_PREFIX: &str = "tripmate-";

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub topic_prefix: String,
    pub reminder_hour_utc: u32,
    pub cors_origin: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let reminder_hour_utc: u32 = try_load("REMINDER_HOUR_UTC", "9")?;
        if reminder_hour_utc > 23 {
            return Err(ConfigError::Invalid {
                key: "REMINDER_HOUR_UTC".to_string(),
                reason: format!("{reminder_hour_utc} is not an hour of the day"),
            });
        }

        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            database_url: read_secret("DATABASE_URL")?,
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379")?,
            topic_prefix: try_load("TOPIC_PREFIX", DEFAULT_TOPIC_PREFIX)?,
            reminder_hour_utc,
            cors_origin: try_load("CORS_ORIGIN", "*")?,
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })
}

/// Docker secret first, then the environment.
fn read_secret(secret_name: &str) -> Result<String, ConfigError> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Ok(secret.trim().to_string()),
        Err(e) => {
            info!("Secret {secret_name} not readable from file ({e}), trying environment");
            var(secret_name).ok_or_else(|| {
                warn!("Secret {secret_name} not found");
                ConfigError::Missing {
                    key: secret_name.to_string(),
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_when_unset() {
        let port: u16 = try_load("TRIPMATE_TEST_UNSET_PORT", "1111").unwrap();
        assert_eq!(port, 1111);
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let error = try_load::<u16>("TRIPMATE_TEST_UNSET_BAD", "not-a-port").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { ref key, .. } if key == "TRIPMATE_TEST_UNSET_BAD"));
    }

    #[test]
    fn test_missing_secret() {
        let error = read_secret("TRIPMATE_TEST_MISSING_SECRET").unwrap_err();
        assert!(matches!(error, ConfigError::Missing { .. }));
    }
}
