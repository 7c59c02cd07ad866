//! Mutually exclusive status labels.
//!
//! A pull request carries at most one status label. [`set_status`] is the only
//! way the workflow changes it: it clears every other status label and adds the
//! requested one, and does nothing when the requested status is already the
//! only one present.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::api::PlatformApi;
use crate::issue::IssueRecord;

/// Label marking a pull request as opted in to the workflow.
pub const OPT_IN_LABEL: &str = "marvin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    NeedsReview,
    NeedsWork,
    NeedsMerge,
    NeedsReviewer,
    AwaitingReviewer,
    NeedsMerger,
    AwaitingMerger,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::NeedsReview,
        Status::NeedsWork,
        Status::NeedsMerge,
        Status::NeedsReviewer,
        Status::AwaitingReviewer,
        Status::NeedsMerger,
        Status::AwaitingMerger,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Status::NeedsReview => "needs_review",
            Status::NeedsWork => "needs_work",
            Status::NeedsMerge => "needs_merge",
            Status::NeedsReviewer => "needs_reviewer",
            Status::AwaitingReviewer => "awaiting_reviewer",
            Status::NeedsMerger => "needs_merger",
            Status::AwaitingMerger => "awaiting_merger",
        }
    }

    /// Whether humans may set this status through a comment command.
    /// The remaining statuses belong to triage.
    pub fn is_human_settable(self) -> bool {
        matches!(
            self,
            Status::NeedsReview | Status::NeedsWork | Status::NeedsMerge
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Status::ALL
            .into_iter()
            .find(|status| status.label() == s)
            .ok_or_else(|| anyhow!("unknown status label: {}", s))
    }
}

/// Label mutations needed to move a label set to a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPlan {
    pub remove: Vec<Status>,
    pub add: Option<Status>,
}

impl StatusPlan {
    pub fn for_labels<'a>(labels: impl IntoIterator<Item = &'a str>, target: Status) -> Self {
        let present: Vec<Status> = labels
            .into_iter()
            .filter_map(|label| label.parse::<Status>().ok())
            .collect();

        let mut remove: Vec<Status> = present
            .iter()
            .copied()
            .filter(|status| *status != target)
            .collect();
        remove.sort();
        remove.dedup();

        let add = (!present.contains(&target)).then_some(target);

        StatusPlan { remove, add }
    }

    pub fn is_noop(&self) -> bool {
        self.remove.is_empty() && self.add.is_none()
    }
}

/// Set the status of `issue`, removing any other status label.
///
/// Every removal is attempted even if an earlier one fails, and the addition
/// is attempted regardless. Failures are reported together afterwards, so the
/// label set may briefly hold zero or two statuses until a later call succeeds.
pub async fn set_status(api: &dyn PlatformApi, issue: &IssueRecord, status: Status) -> Result<()> {
    let plan = StatusPlan::for_labels(issue.labels.iter().map(|l| l.name.as_str()), status);
    if plan.is_noop() {
        return Ok(());
    }

    let target = issue.labels_target();
    let mut failed = Vec::new();

    for stale in &plan.remove {
        if let Err(e) = api.remove_label(target, stale.label()).await {
            warn!(
                "Failed to remove {} from #{}: {:#}",
                stale, issue.number, e
            );
            failed.push(format!("remove {}", stale));
        }
    }

    if let Some(new_status) = plan.add {
        if let Err(e) = api.add_labels(target, &[new_status.label()]).await {
            warn!("Failed to add {} to #{}: {:#}", new_status, issue.number, e);
            failed.push(format!("add {}", new_status));
        }
    }

    if failed.is_empty() {
        info!("#{} is now {}", issue.number, status);
        Ok(())
    } else {
        Err(anyhow!(
            "setting #{} to {} left labels inconsistent ({})",
            issue.number,
            status,
            failed.join(", ")
        ))
    }
}
