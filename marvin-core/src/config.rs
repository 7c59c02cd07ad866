use chrono::Duration;

use crate::command::{CommandRouter, Directive};

pub const DEFAULT_BOT_NAME: &str = "marvin-mk2";

/// Settings shared by the comment engine and triage.
///
/// Constructed once at startup and passed around by reference.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub bot_name: String,
    /// How long a pull request may sit in `awaiting_reviewer` without updates.
    pub reviewer_timeout: Duration,
    /// How long a pull request may sit in `awaiting_merger` without updates.
    pub merger_timeout: Duration,
    router: CommandRouter<Directive>,
}

impl WorkflowConfig {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            reviewer_timeout: Duration::days(3),
            merger_timeout: Duration::days(3),
            router: CommandRouter::standard(),
        }
    }

    pub fn router(&self) -> &CommandRouter<Directive> {
        &self.router
    }

    /// Whether `login` is this bot, either as a plain user or as the app's
    /// `[bot]` account.
    pub fn is_own_login(&self, login: &str) -> bool {
        login == self.bot_name
            || login
                .strip_suffix("[bot]")
                .is_some_and(|name| name == self.bot_name)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BOT_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_login() {
        let config = WorkflowConfig::default();
        assert!(config.is_own_login("marvin-mk2"));
        assert!(config.is_own_login("marvin-mk2[bot]"));
        assert!(!config.is_own_login("marvin-mk3[bot]"));
        assert!(!config.is_own_login("alice"));
        assert!(!config.is_own_login("[bot]"));
    }

    #[test]
    fn test_default_timeouts() {
        let config = WorkflowConfig::new("bot");
        assert_eq!(config.reviewer_timeout, Duration::days(3));
        assert_eq!(config.merger_timeout, Duration::days(3));
    }
}
