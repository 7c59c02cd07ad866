//! Capabilities the workflow needs from the code-hosting platform.
//!
//! The workflow never talks HTTP directly. It mutates labels, posts comments
//! and requests reviews through [`PlatformApi`], which the GitHub client
//! implements per installation and tests implement with an in-memory fake.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use std::fmt;

use crate::issue::IssueRecord;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub full_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSort {
    /// Least recently updated first.
    UpdatedAsc,
    /// Oldest first.
    CreatedAsc,
}

impl SearchSort {
    fn as_str(self) -> &'static str {
        match self {
            SearchSort::UpdatedAsc => "updated-asc",
            SearchSort::CreatedAsc => "created-asc",
        }
    }
}

/// An ordered list of search filter clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    repo: String,
    labels: Vec<String>,
    sort: SearchSort,
}

impl SearchQuery {
    /// Open pull requests in `repo`.
    pub fn open_pull_requests(repo: impl Into<String>, sort: SearchSort) -> Self {
        Self {
            repo: repo.into(),
            labels: Vec::new(),
            sort,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn sort(&self) -> SearchSort {
        self.sort
    }

    pub fn clauses(&self) -> Vec<String> {
        let mut clauses = vec![
            format!("repo:{}", self.repo),
            "is:open".to_string(),
            "is:pr".to_string(),
        ];
        clauses.extend(self.labels.iter().map(|l| format!("label:{}", l)));
        clauses.push(format!("sort:{}", self.sort.as_str()));
        clauses
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clauses().join(" "))
    }
}

/// Remote operations on issues and pull requests.
///
/// Each call is a single request with no retry. Callers decide how to react
/// to failures.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Add labels to the issue at `issue_url`.
    async fn add_labels(&self, issue_url: &str, labels: &[&str]) -> Result<()>;

    /// Remove one label from the issue at `issue_url`.
    async fn remove_label(&self, issue_url: &str, label: &str) -> Result<()>;

    async fn post_comment(&self, comments_url: &str, body: &str) -> Result<()>;

    /// Request a review from `reviewer` on the pull request at `pull_request_url`.
    async fn request_review(&self, pull_request_url: &str, reviewer: &str) -> Result<()>;

    /// Lazily page through search results in the order the query asks for.
    ///
    /// Pages are only fetched as the stream is polled, so a consumer that
    /// stops early saves the remaining requests.
    fn search_issues<'a>(&'a self, query: &SearchQuery) -> BoxStream<'a, Result<IssueRecord>>;

    async fn list_repositories(&self) -> Result<Vec<Repository>>;
}
