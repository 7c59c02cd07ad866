//! Triage across every installation of the GitHub App.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::WorkflowConfig;
use crate::github::GitHubClient;
use crate::reviewer::ReviewerSelector;
use crate::triage::{Triage, TriageReport};

/// Run triage for the repositories of every installation.
///
/// An installation whose repositories cannot be listed is logged and skipped.
pub async fn sweep_installations(
    github: &GitHubClient,
    selector: &dyn ReviewerSelector,
    workflow: &WorkflowConfig,
    now: DateTime<Utc>,
) -> Result<TriageReport> {
    let installations = github
        .list_installations()
        .await
        .context("Failed to list app installations")?;

    info!("Sweeping {} installation(s)", installations.len());

    let mut report = TriageReport::default();
    for installation in installations {
        let api = github.installation(installation.id);
        let account = installation
            .account
            .as_ref()
            .map(|a| a.login.as_str())
            .unwrap_or("unknown");
        match Triage::new(&api, selector, workflow).run(now).await {
            Ok(partial) => report.repositories.extend(partial.repositories),
            Err(e) => error!(
                "Triage failed for installation {} ({}): {:#}",
                installation.id, account, e
            ),
        }
    }

    info!(
        "Sweep finished: {} transition(s), {} failure(s)",
        report.transitioned(),
        report.failed()
    );
    Ok(report)
}
