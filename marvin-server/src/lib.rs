pub mod config;
pub mod triage_loop;
pub mod webhook;

use std::sync::Arc;

use marvin_core::{GitHubClient, ReviewerSelector, WorkflowConfig};

use crate::triage_loop::TriageRunner;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn get_bot_version() -> String {
    let hash = option_env!("MARVIN_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match hash {
        Some(hash) => hash.chars().take(8).collect(),
        None => built_info::PKG_VERSION.to_string(),
    }
}

pub struct AppState {
    pub github_client: GitHubClient,
    pub workflow: WorkflowConfig,
    pub selector: Arc<dyn ReviewerSelector>,
    pub webhook_secret: String,
    pub triage: TriageRunner,
}
