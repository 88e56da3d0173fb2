use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "wiktbot/0.1";
pub const DEFAULT_CONFLICT_RETRIES: usize = 5;
pub const DEFAULT_DELETE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub bot: BotSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub url: Option<String>,
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotSection {
    pub edit_summary_prefix: Option<String>,
    pub max_conflict_retries: Option<usize>,
    pub delete_attempts: Option<usize>,
}

impl WikiConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > derived from `url`.
    pub fn api_url_owned(&self) -> Option<String> {
        if let Some(value) = env_non_empty("WIKI_API_URL") {
            return Some(value);
        }
        if let Some(api_url) = &self.wiki.api_url {
            return Some(api_url.clone());
        }
        self.wiki.url.as_deref().map(derive_api_url)
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Some(value) = env_non_empty("WIKI_USER_AGENT") {
            return value;
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn edit_summary_prefix(&self) -> Option<&str> {
        self.bot
            .edit_summary_prefix
            .as_deref()
            .filter(|prefix| !prefix.trim().is_empty())
    }

    pub fn max_conflict_retries(&self) -> usize {
        self.bot
            .max_conflict_retries
            .unwrap_or(DEFAULT_CONFLICT_RETRIES)
    }

    pub fn delete_attempts(&self) -> usize {
        self.bot
            .delete_attempts
            .unwrap_or(DEFAULT_DELETE_ATTEMPTS)
            .max(1)
    }
}

/// Bot account credentials, taken from the environment only.
#[derive(Clone)]
pub struct BotCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BotCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BotCredentials {
    pub fn from_env() -> Result<Self> {
        let username = env_non_empty("WIKI_BOT_USER")
            .ok_or_else(|| anyhow::anyhow!("WIKI_BOT_USER is required for --save"))?;
        let password = env_non_empty("WIKI_BOT_PASS")
            .ok_or_else(|| anyhow::anyhow!("WIKI_BOT_PASS is required for --save"))?;
        Ok(Self { username, password })
    }
}

/// Load and parse a WikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Derive the API endpoint from a wiki base URL (`https://host` -> `https://host/w/api.php`).
pub fn derive_api_url(wiki_url: &str) -> String {
    let trimmed = wiki_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/api.php") {
        return trimmed.to_string();
    }
    if trimmed.ends_with("/w") {
        return format!("{trimmed}/api.php");
    }
    format!("{trimmed}/w/api.php")
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_urls() {
        let config = WikiConfig::default();
        assert!(config.wiki.url.is_none());
        assert!(config.wiki.api_url.is_none());
        assert_eq!(config.max_conflict_retries(), DEFAULT_CONFLICT_RETRIES);
        assert_eq!(config.delete_attempts(), DEFAULT_DELETE_ATTEMPTS);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, WikiConfig::default());
    }

    #[test]
    fn load_config_parses_wiki_and_bot_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
url = "https://en.wiktionary.org"
api_url = "https://en.wiktionary.org/w/api.php"
user_agent = "test-agent/1.0"

[bot]
edit_summary_prefix = "cleanup: "
max_conflict_retries = 2
delete_attempts = 0
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wiki.api_url.as_deref(),
            Some("https://en.wiktionary.org/w/api.php")
        );
        assert_eq!(config.wiki.user_agent.as_deref(), Some("test-agent/1.0"));
        assert_eq!(config.edit_summary_prefix(), Some("cleanup: "));
        assert_eq!(config.max_conflict_retries(), 2);
        assert_eq!(config.delete_attempts(), 1);
    }

    #[test]
    fn load_config_tolerates_unknown_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[paths]\nproject_root = \"/foo\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.wiki.url.is_none());
        assert!(config.edit_summary_prefix().is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\nurl = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn derive_api_url_appends_script_path() {
        assert_eq!(
            derive_api_url("https://en.wiktionary.org/"),
            "https://en.wiktionary.org/w/api.php"
        );
        assert_eq!(
            derive_api_url("https://wiki.example.org/w"),
            "https://wiki.example.org/w/api.php"
        );
        assert_eq!(
            derive_api_url("https://wiki.example.org/api.php"),
            "https://wiki.example.org/api.php"
        );
    }

    #[test]
    fn blank_summary_prefix_is_ignored() {
        let config = WikiConfig {
            bot: BotSection {
                edit_summary_prefix: Some("  ".to_string()),
                ..BotSection::default()
            },
            ..WikiConfig::default()
        };
        assert!(config.edit_summary_prefix().is_none());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let credentials = BotCredentials {
            username: "Bot".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("Bot"));
        assert!(!rendered.contains("hunter2"));
    }
}
