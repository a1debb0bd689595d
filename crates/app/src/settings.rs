//! Handles settings for the application.
//!
//! Configuration is read from an optional TOML file (`settings.toml` by
//! default) and overridden by `MONETA__*` environment variables, e.g.
//! `MONETA__DATABASE__URL` or `MONETA__QUEUE__CONCURRENCY`.
use config::{Config, ConfigError, Environment, File};
use engine::{QueueSettings, RetrySettings};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Database {
    pub url: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: "sqlite:./moneta.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub retry: RetrySettings,
    pub queue: QueueSettings,
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("MONETA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::new("does-not-exist").unwrap();
        assert_eq!(settings.app.level, "info");
        assert_eq!(settings.database.url, "sqlite:./moneta.db?mode=rwc");
        assert_eq!(settings.queue, QueueSettings::default());
        assert_eq!(settings.retry, RetrySettings::default());
    }
}
