use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Data layout
    pub data_dir: PathBuf,
    pub accounts_path: PathBuf,
    pub state_path: PathBuf,

    // Session
    pub encrypt_key: String,
    pub initial_cookies: Option<String>,

    // Crawl
    pub max_pages: Option<u32>,
    pub chrome_path: Option<String>,
    pub page_timeout: Duration,
    pub http_timeout: Duration,

    // Translation
    pub translate_languages: Vec<String>,
    pub translate_api_base: String,
    pub translate_api_key: Option<String>,
    pub translate_model: String,
    pub translate_force: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(env_or_default("DATA_DIR", "./data"));
        let accounts_path = optional_env("ACCOUNTS_PATH")
            .map_or_else(|| data_dir.join("accounts.json"), PathBuf::from);
        let state_path = optional_env("BROWSER_STATE_PATH")
            .map_or_else(|| data_dir.join("browser_state.json"), PathBuf::from);

        Ok(Self {
            data_dir,
            accounts_path,
            state_path,

            encrypt_key: required_env("ENCRYPT_KEY")?,
            initial_cookies: optional_env("INITIAL_COOKIES"),

            max_pages: parse_env_opt_u32("MAX_PAGES")?,
            chrome_path: optional_env("CHROME_PATH"),
            page_timeout: Duration::from_secs(parse_env_u64("PAGE_TIMEOUT_SECS", 30)?),
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),

            translate_languages: parse_language_list(&env_or_default("TRANSLATE_LANGUAGES", "")),
            translate_api_base: env_or_default(
                "TRANSLATE_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta/openai",
            ),
            translate_api_key: optional_env("TRANSLATE_API_KEY"),
            translate_model: env_or_default("TRANSLATE_MODEL", "gemini-2.0-flash"),
            translate_force: parse_env_bool("TRANSLATE_FORCE", false)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encrypt_key.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "ENCRYPT_KEY".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.page_timeout.is_zero() || self.http_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "PAGE_TIMEOUT_SECS".to_string(),
                message: "timeouts must be at least 1 second".to_string(),
            });
        }
        if let Some(0) = self.max_pages {
            return Err(ConfigError::InvalidValue {
                name: "MAX_PAGES".to_string(),
                message: "must be at least 1 when set".to_string(),
            });
        }
        if !self.translate_languages.is_empty() && self.translate_api_key.is_none() {
            return Err(ConfigError::InvalidValue {
                name: "TRANSLATE_API_KEY".to_string(),
                message: "required when TRANSLATE_LANGUAGES is set".to_string(),
            });
        }
        Ok(())
    }

    /// A configuration suitable for tests: no env access, temp-friendly defaults.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            accounts_path: PathBuf::from("./data/accounts.json"),
            state_path: PathBuf::from("./data/browser_state.json"),
            encrypt_key: String::new(),
            initial_cookies: None,
            max_pages: None,
            chrome_path: None,
            page_timeout: Duration::from_secs(30),
            http_timeout: Duration::from_secs(30),
            translate_languages: Vec::new(),
            translate_api_base: "http://127.0.0.1:0".to_string(),
            translate_api_key: None,
            translate_model: "test-model".to_string(),
            translate_force: false,
        }
    }
}

fn parse_language_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_opt_u32(name: &str) -> Result<Option<u32>, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::ParseInt {
                name: name.to_string(),
                source: e,
            }),
        _ => Ok(None),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_language_list() {
        assert_eq!(parse_language_list(""), Vec::<String>::new());
        assert_eq!(parse_language_list("ko"), vec!["ko"]);
        assert_eq!(parse_language_list("ko, JA ,fr"), vec!["ko", "ja", "fr"]);
        assert_eq!(parse_language_list(",,"), Vec::<String>::new());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_env_bool("NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("NONEXISTENT_VAR", false).unwrap());
    }

    #[test]
    fn test_validate_rejects_translation_without_key() {
        let mut config = Config::for_testing();
        config.encrypt_key = "key".to_string();
        config.translate_languages = vec!["ko".to_string()];
        assert!(config.validate().is_err());

        config.translate_api_key = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_key() {
        let config = Config::for_testing();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_pages() {
        let mut config = Config::for_testing();
        config.encrypt_key = "key".to_string();
        config.max_pages = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_requires_encrypt_key() {
        std::env::remove_var("ENCRYPT_KEY");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingEnvVar(name)) if name == "ENCRYPT_KEY"
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_derives_paths_from_data_dir() {
        std::env::set_var("ENCRYPT_KEY", "dGVzdA==");
        std::env::set_var("DATA_DIR", "/tmp/archive-data");
        std::env::set_var("MAX_PAGES", "3");

        let config = Config::from_env().unwrap();
        assert_eq!(config.max_pages, Some(3));
        assert_eq!(
            config.accounts_path,
            PathBuf::from("/tmp/archive-data/accounts.json")
        );
        assert_eq!(
            config.state_path,
            PathBuf::from("/tmp/archive-data/browser_state.json")
        );

        std::env::remove_var("ENCRYPT_KEY");
        std::env::remove_var("DATA_DIR");
        std::env::remove_var("MAX_PAGES");
    }
}
