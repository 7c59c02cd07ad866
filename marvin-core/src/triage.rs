//! Periodic triage of opted-in pull requests.
//!
//! Each repository gets four passes, always in this order:
//!
//! 1. `awaiting_reviewer` pull requests without updates for the reviewer
//!    timeout go back to `needs_reviewer`.
//! 2. `awaiting_merger` pull requests without updates for the merger timeout
//!    go back to `needs_merger`.
//! 3. `needs_merger` pull requests get a reviewer with merge permission and
//!    move to `awaiting_merger`.
//! 4. `needs_reviewer` pull requests get a reviewer and move to
//!    `awaiting_reviewer`.
//!
//! The assignment passes pick up what the timeout passes just released.
//! Failures are contained to the pull request they happened on.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use std::fmt;
use tracing::{error, info, warn};

use crate::api::{PlatformApi, Repository, SearchQuery, SearchSort};
use crate::config::WorkflowConfig;
use crate::issue::IssueRecord;
use crate::reviewer::ReviewerSelector;
use crate::status::{set_status, Status, OPT_IN_LABEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    ReviewerTimeout,
    MergerTimeout,
    MergerAssignment,
    ReviewerAssignment,
}

impl Pass {
    pub const ORDER: [Pass; 4] = [
        Pass::ReviewerTimeout,
        Pass::MergerTimeout,
        Pass::MergerAssignment,
        Pass::ReviewerAssignment,
    ];

    /// Status the pass searches for.
    pub fn source(self) -> Status {
        match self {
            Pass::ReviewerTimeout => Status::AwaitingReviewer,
            Pass::MergerTimeout => Status::AwaitingMerger,
            Pass::MergerAssignment => Status::NeedsMerger,
            Pass::ReviewerAssignment => Status::NeedsReviewer,
        }
    }

    /// Status the pass moves pull requests to.
    pub fn target(self) -> Status {
        match self {
            Pass::ReviewerTimeout => Status::NeedsReviewer,
            Pass::MergerTimeout => Status::NeedsMerger,
            Pass::MergerAssignment => Status::AwaitingMerger,
            Pass::ReviewerAssignment => Status::AwaitingReviewer,
        }
    }

    pub fn query(self, repo: &str) -> SearchQuery {
        let sort = match self {
            // stale first
            Pass::ReviewerTimeout | Pass::MergerTimeout => SearchSort::UpdatedAsc,
            // longest waiting first
            Pass::MergerAssignment | Pass::ReviewerAssignment => SearchSort::CreatedAsc,
        };
        SearchQuery::open_pull_requests(repo, sort)
            .with_label(self.source().label())
            .with_label(OPT_IN_LABEL)
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::ReviewerTimeout => write!(f, "reviewer timeout"),
            Pass::MergerTimeout => write!(f, "merger timeout"),
            Pass::MergerAssignment => write!(f, "merger assignment"),
            Pass::ReviewerAssignment => write!(f, "reviewer assignment"),
        }
    }
}

/// Outcome of one pass over one repository. Entries are pull request numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Search results consumed, including the one that ended a timeout pass.
    pub visited: usize,
    pub transitioned: Vec<u64>,
    /// Pull requests left alone because no reviewer was available.
    pub skipped: Vec<u64>,
    pub failed: Vec<u64>,
    pub search_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReport {
    pub repository: String,
    pub passes: Vec<(Pass, PassReport)>,
}

impl RepositoryReport {
    pub fn pass(&self, pass: Pass) -> Option<&PassReport> {
        self.passes.iter().find(|(p, _)| *p == pass).map(|(_, r)| r)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriageReport {
    pub repositories: Vec<RepositoryReport>,
}

impl TriageReport {
    pub fn transitioned(&self) -> usize {
        self.all_passes().map(|r| r.transitioned.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.all_passes()
            .map(|r| r.failed.len() + usize::from(r.search_failed))
            .sum()
    }

    fn all_passes(&self) -> impl Iterator<Item = &PassReport> {
        self.repositories
            .iter()
            .flat_map(|repo| repo.passes.iter().map(|(_, r)| r))
    }
}

pub struct Triage<'a> {
    api: &'a dyn PlatformApi,
    selector: &'a dyn ReviewerSelector,
    config: &'a WorkflowConfig,
}

impl<'a> Triage<'a> {
    pub fn new(
        api: &'a dyn PlatformApi,
        selector: &'a dyn ReviewerSelector,
        config: &'a WorkflowConfig,
    ) -> Self {
        Self {
            api,
            selector,
            config,
        }
    }

    /// Triage every repository the platform handle can access.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<TriageReport> {
        let repositories = self
            .api
            .list_repositories()
            .await
            .context("Failed to list repositories")?;
        Ok(self.run_repositories(&repositories, now).await)
    }

    pub async fn run_repositories(
        &self,
        repositories: &[Repository],
        now: DateTime<Utc>,
    ) -> TriageReport {
        let mut report = TriageReport::default();
        for repository in repositories {
            report
                .repositories
                .push(self.run_repository(&repository.full_name, now).await);
        }
        report
    }

    pub async fn run_repository(&self, repository: &str, now: DateTime<Utc>) -> RepositoryReport {
        info!("Running triage on {}", repository);
        let mut passes = Vec::with_capacity(Pass::ORDER.len());
        for pass in Pass::ORDER {
            let report = match pass {
                Pass::ReviewerTimeout => {
                    self.timeout_pass(repository, pass, self.config.reviewer_timeout, now)
                        .await
                }
                Pass::MergerTimeout => {
                    self.timeout_pass(repository, pass, self.config.merger_timeout, now)
                        .await
                }
                Pass::MergerAssignment => self.assignment_pass(repository, pass, true).await,
                Pass::ReviewerAssignment => self.assignment_pass(repository, pass, false).await,
            };
            passes.push((pass, report));
        }
        RepositoryReport {
            repository: repository.to_string(),
            passes,
        }
    }

    async fn timeout_pass(
        &self,
        repository: &str,
        pass: Pass,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> PassReport {
        info!("Timing out {} PRs in {}", pass.source(), repository);
        let mut report = PassReport::default();
        let mut results = self.api.search_issues(&pass.query(repository));

        while let Some(result) = results.next().await {
            let issue = match result {
                Ok(issue) => issue,
                Err(e) => {
                    error!("Search for {} pass failed: {:#}", pass, e);
                    report.search_failed = true;
                    break;
                }
            };
            report.visited += 1;

            // Results are oldest-updated first, so everything after this is fresher.
            if now - issue.updated_at < timeout {
                break;
            }

            info!(
                "{} -> {}: #{} ({})",
                pass.source(),
                pass.target(),
                issue.number,
                issue.title
            );
            match set_status(self.api, &issue, pass.target()).await {
                Ok(()) => report.transitioned.push(issue.number),
                Err(e) => {
                    error!("Failed to time out #{}: {:#}", issue.number, e);
                    report.failed.push(issue.number);
                }
            }
        }

        report
    }

    async fn assignment_pass(
        &self,
        repository: &str,
        pass: Pass,
        require_merge_permission: bool,
    ) -> PassReport {
        info!("Assigning reviewers to {} PRs in {}", pass.source(), repository);
        let mut report = PassReport::default();
        let mut results = self.api.search_issues(&pass.query(repository));

        while let Some(result) = results.next().await {
            let issue = match result {
                Ok(issue) => issue,
                Err(e) => {
                    error!("Search for {} pass failed: {:#}", pass, e);
                    report.search_failed = true;
                    break;
                }
            };
            report.visited += 1;

            match self
                .assign(&issue, pass.target(), require_merge_permission)
                .await
            {
                Ok(true) => report.transitioned.push(issue.number),
                Ok(false) => report.skipped.push(issue.number),
                Err(e) => {
                    error!("Failed to assign a reviewer to #{}: {:#}", issue.number, e);
                    report.failed.push(issue.number);
                }
            }
        }

        report
    }

    /// Returns whether a reviewer was found and the status moved on.
    async fn assign(
        &self,
        issue: &IssueRecord,
        target: Status,
        require_merge_permission: bool,
    ) -> Result<bool> {
        let pull_request_url = issue
            .pull_request_url()
            .ok_or_else(|| anyhow!("#{} is not a pull request", issue.number))?;

        let Some(reviewer) = self
            .selector
            .select_reviewer(issue, require_merge_permission)
            .await
            .context("Reviewer selection failed")?
        else {
            if require_merge_permission {
                warn!("No reviewer with merge permission found for #{}.", issue.number);
            } else {
                warn!("No reviewer found for #{}.", issue.number);
            }
            return Ok(false);
        };

        info!("Requesting review from {} for #{}.", reviewer, issue.number);
        self.api
            .request_review(pull_request_url, &reviewer)
            .await
            .with_context(|| format!("Failed to request review from {}", reviewer))?;
        set_status(self.api, issue, target).await?;
        Ok(true)
    }
}
