pub mod api;
pub mod command;
pub mod config;
pub mod correlation;
pub mod github;
pub mod issue;
pub mod reaction;
pub mod reviewer;
pub mod status;
pub mod sweep;
pub mod triage;

#[cfg(test)]
mod testing;

pub use api::{PlatformApi, Repository, SearchQuery, SearchSort};
pub use command::{parse_commands, CommandRouter, Directive, Routed};
pub use config::WorkflowConfig;
pub use correlation::{CorrelationId, CORRELATION_ID_HEADER};
pub use github::{GitHubClient, InstallationApi};
pub use issue::{IssueRecord, Label, PullRequestLink, User};
pub use reaction::{handle_comment, CommentEvent, CommandEffect, Reaction};
pub use reviewer::{ReviewerSelector, RosterSelector};
pub use status::{set_status, Status, OPT_IN_LABEL};
pub use sweep::sweep_installations;
pub use triage::{Pass, PassReport, RepositoryReport, Triage, TriageReport};
