//! Issue and pull request records as delivered by webhooks and the search API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestLink {
    pub url: String,
}

/// An issue or pull request.
///
/// Issue-comment webhooks and search results deliver pull requests in their
/// issue form, with a `pull_request` link. Review-comment webhooks deliver the
/// pull request itself, whose `url` points at the pulls endpoint and whose
/// `issue_url` points at the underlying issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: u64,
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub user: User,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub issue_url: Option<String>,
    pub comments_url: String,
    #[serde(default)]
    pub pull_request: Option<PullRequestLink>,
}

impl IssueRecord {
    /// Endpoint that owns the label set. Labels always live on the issue.
    pub fn labels_target(&self) -> &str {
        self.issue_url.as_deref().unwrap_or(&self.url)
    }

    /// Pulls endpoint used for review requests, if this record is a pull request.
    pub fn pull_request_url(&self) -> Option<&str> {
        if let Some(link) = &self.pull_request {
            return Some(&link.url);
        }
        // Pull request payloads carry `issue_url` and are themselves the pulls endpoint.
        self.issue_url.as_ref().map(|_| self.url.as_str())
    }

    pub fn label_names(&self) -> BTreeSet<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }
}
