use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

use marvin_core::config::DEFAULT_BOT_NAME;
use marvin_core::github::DEFAULT_API_URL;
use marvin_core::RosterSelector;

#[derive(Clone)]
pub struct Config {
    pub github_app_id: u64,
    pub github_private_key: String,
    pub webhook_secret: String,
    pub bot_name: String,
    pub port: u16,
    pub github_api_url: String,
    /// How often to run triage. `None` disables the periodic loop.
    pub triage_interval: Option<Duration>,
    /// Wall-clock cap on a single triage sweep.
    pub triage_deadline: Duration,
    pub reviewers: Vec<String>,
    pub mergers: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let webhook_secret = load_secret(&lookup, "WEBHOOK_SECRET", "WEBHOOK_SECRET_FILE")?;

        let github_private_key = load_secret(&lookup, "GH_PRIVATE_KEY", "GH_PRIVATE_KEY_FILE")?
            .replace("\\n", "\n");

        let github_app_id = load_secret(&lookup, "GH_APP_ID", "GH_APP_ID_FILE")?
            .parse::<u64>()
            .context("GH_APP_ID must be a valid number")?;

        let bot_name = lookup("BOT_NAME").unwrap_or_else(|| DEFAULT_BOT_NAME.to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let github_api_url =
            lookup("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let triage_interval_secs = lookup("TRIAGE_INTERVAL_SECS")
            .unwrap_or_else(|| "3600".to_string())
            .parse::<u64>()
            .context("TRIAGE_INTERVAL_SECS must be a valid number")?;
        let triage_interval =
            (triage_interval_secs > 0).then(|| Duration::from_secs(triage_interval_secs));

        let triage_deadline = lookup("TRIAGE_DEADLINE_SECS")
            .unwrap_or_else(|| "1800".to_string())
            .parse::<u64>()
            .map(Duration::from_secs)
            .context("TRIAGE_DEADLINE_SECS must be a valid number")?;

        let reviewers = lookup("MARVIN_REVIEWERS")
            .map(|v| RosterSelector::parse_roster(&v))
            .unwrap_or_default();
        let mergers = lookup("MARVIN_MERGERS")
            .map(|v| RosterSelector::parse_roster(&v))
            .unwrap_or_default();

        Ok(Config {
            github_app_id,
            github_private_key,
            webhook_secret,
            bot_name,
            port,
            github_api_url,
            triage_interval,
            triage_deadline,
            reviewers,
            mergers,
        })
    }
}

/// Read a secret from `key`, or from the file named by `file_key`.
pub fn load_secret(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    file_key: &str,
) -> Result<String> {
    if let Some(value) = lookup(key) {
        return Ok(value);
    }
    if let Some(path) = lookup(file_key) {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {} from {}", key, path))?;
        return Ok(contents.trim().to_string());
    }
    Err(anyhow!("You need to set either {} or {}.", key, file_key))
}
