use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Bot API token used both for ingestion polling and alert delivery.
    pub bot_token: String,
    /// Destination chat for alerts.
    pub alert_chat_id: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitoringConfig {
    /// Allow-listed chat ids (Bot API format, e.g. -100xxxx for channels).
    #[serde(default)]
    pub chats: Vec<i64>,
    /// Keyword specs: `re:` regex, `*` glob, phrase, or single token.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            bail!("telegram.bot_token is required");
        }
        if self.monitoring.chats.is_empty() {
            bail!("no chats configured for monitoring");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn parses_full_config() {
        let config = parse(
            r#"
            [telegram]
            bot_token = "123:abc"
            alert_chat_id = -1001234

            [monitoring]
            chats = [-1009876, -1008765]
            keywords = ["bitcoin", "rtx * 5070", "re:(?i)b[oa]t"]
            "#,
        )
        .unwrap();

        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.alert_chat_id, -1001234);
        assert_eq!(config.monitoring.chats, vec![-1009876, -1008765]);
        assert_eq!(config.monitoring.keywords.len(), 3);
    }

    #[test]
    fn empty_chat_list_is_rejected() {
        let err = parse(
            r#"
            [telegram]
            bot_token = "123:abc"
            alert_chat_id = 1

            [monitoring]
            keywords = ["bitcoin"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no chats"));
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = parse(
            r#"
            [telegram]
            bot_token = ""
            alert_chat_id = 1

            [monitoring]
            chats = [1]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bot_token"));
    }

    #[test]
    fn keywords_default_to_empty() {
        let config = parse(
            r#"
            [telegram]
            bot_token = "123:abc"
            alert_chat_id = 1

            [monitoring]
            chats = [1]
            "#,
        )
        .unwrap();
        assert!(config.monitoring.keywords.is_empty());
    }
}
