//! Choosing who reviews or merges a pull request.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::issue::IssueRecord;

/// Policy that picks a reviewer for a pull request.
#[async_trait]
pub trait ReviewerSelector: Send + Sync {
    /// Pick a reviewer for `issue`, or `None` if nobody is available right now.
    async fn select_reviewer(
        &self,
        issue: &IssueRecord,
        require_merge_permission: bool,
    ) -> Result<Option<String>>;
}

/// Round-robin over fixed lists of reviewers and mergers.
///
/// The pull request's author is never chosen.
#[derive(Debug, Default)]
pub struct RosterSelector {
    reviewers: Vec<String>,
    mergers: Vec<String>,
    next_reviewer: AtomicUsize,
    next_merger: AtomicUsize,
}

impl RosterSelector {
    pub fn new(reviewers: Vec<String>, mergers: Vec<String>) -> Self {
        Self {
            reviewers,
            mergers,
            next_reviewer: AtomicUsize::new(0),
            next_merger: AtomicUsize::new(0),
        }
    }

    /// Parse a comma-separated list of logins, ignoring blanks.
    pub fn parse_roster(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|login| !login.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.reviewers.is_empty() && self.mergers.is_empty()
    }

    fn pick(roster: &[String], cursor: &AtomicUsize, author: &str) -> Option<String> {
        if roster.is_empty() {
            return None;
        }
        let start = cursor.fetch_add(1, Ordering::Relaxed);
        (0..roster.len())
            .map(|offset| &roster[(start + offset) % roster.len()])
            .find(|login| !login.eq_ignore_ascii_case(author))
            .cloned()
    }
}

#[async_trait]
impl ReviewerSelector for RosterSelector {
    async fn select_reviewer(
        &self,
        issue: &IssueRecord,
        require_merge_permission: bool,
    ) -> Result<Option<String>> {
        let (roster, cursor) = if require_merge_permission {
            (&self.mergers, &self.next_merger)
        } else {
            (&self.reviewers, &self.next_reviewer)
        };
        Ok(Self::pick(roster, cursor, &issue.user.login))
    }
}
