//! In-memory platform used by the workflow tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{PlatformApi, Repository, SearchQuery, SearchSort};
use crate::issue::{IssueRecord, Label, PullRequestLink, User};
use crate::status::Status;

pub const AUTHOR_ID: u64 = 100;
pub const AUTHOR_LOGIN: &str = "author";
pub const REPO: &str = "o/r";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    AddLabels(String, Vec<String>),
    RemoveLabel(String, String),
    PostComment(String, String),
    RequestReview(String, String),
    Search(String),
}

#[derive(Default)]
struct Failures {
    removals: HashSet<String>,
    additions: bool,
    comments: bool,
    review_requests: HashSet<String>,
    searches: bool,
}

pub struct FakePlatform {
    calls: Mutex<Vec<ApiCall>>,
    labels: Mutex<BTreeMap<String, BTreeSet<String>>>,
    issues: Mutex<Vec<IssueRecord>>,
    repositories: Vec<Repository>,
    failures: Mutex<Failures>,
    pulled: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::with_repositories(&[REPO])
    }

    pub fn with_repositories(names: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            labels: Mutex::new(BTreeMap::new()),
            issues: Mutex::new(Vec::new()),
            repositories: names
                .iter()
                .map(|n| Repository {
                    full_name: n.to_string(),
                })
                .collect(),
            failures: Mutex::new(Failures::default()),
            pulled: AtomicUsize::new(0),
        }
    }

    /// Start tracking the labels of `issue` and make it searchable.
    pub fn track(&self, issue: &IssueRecord) {
        self.labels.lock().unwrap().insert(
            issue.labels_target().to_string(),
            issue.labels.iter().map(|l| l.name.clone()).collect(),
        );
        self.issues.lock().unwrap().push(issue.clone());
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than searches.
    pub fn mutations(&self) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, ApiCall::Search(_)))
            .collect()
    }

    pub fn labels_of(&self, issue: &IssueRecord) -> Vec<String> {
        self.labels
            .lock()
            .unwrap()
            .get(issue.labels_target())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn status_labels(&self, issue: &IssueRecord) -> Vec<String> {
        self.labels_of(issue)
            .into_iter()
            .filter(|l| l.parse::<Status>().is_ok())
            .collect()
    }

    /// `issue` with its labels replaced by the current remote label set.
    pub fn refreshed(&self, issue: &IssueRecord) -> IssueRecord {
        let mut fresh = issue.clone();
        fresh.labels = self
            .labels_of(issue)
            .into_iter()
            .map(|name| Label { name })
            .collect();
        fresh
    }

    /// Number of search results consumed so far.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub fn fail_removal_of(&self, label: &str) {
        self.failures
            .lock()
            .unwrap()
            .removals
            .insert(label.to_string());
    }

    pub fn fail_additions(&self) {
        self.failures.lock().unwrap().additions = true;
    }

    pub fn fail_comments(&self) {
        self.failures.lock().unwrap().comments = true;
    }

    pub fn fail_review_requests_on(&self, pull_request_url: &str) {
        self.failures
            .lock()
            .unwrap()
            .review_requests
            .insert(pull_request_url.to_string());
    }

    pub fn fail_searches(&self) {
        self.failures.lock().unwrap().searches = true;
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn add_labels(&self, issue_url: &str, labels: &[&str]) -> Result<()> {
        self.record(ApiCall::AddLabels(
            issue_url.to_string(),
            labels.iter().map(|l| l.to_string()).collect(),
        ));
        if self.failures.lock().unwrap().additions {
            return Err(anyhow!("label addition rejected"));
        }
        let mut all = self.labels.lock().unwrap();
        let set = all.entry(issue_url.to_string()).or_default();
        set.extend(labels.iter().map(|l| l.to_string()));
        Ok(())
    }

    async fn remove_label(&self, issue_url: &str, label: &str) -> Result<()> {
        self.record(ApiCall::RemoveLabel(
            issue_url.to_string(),
            label.to_string(),
        ));
        if self.failures.lock().unwrap().removals.contains(label) {
            return Err(anyhow!("label removal rejected"));
        }
        if let Some(set) = self.labels.lock().unwrap().get_mut(issue_url) {
            set.remove(label);
        }
        Ok(())
    }

    async fn post_comment(&self, comments_url: &str, body: &str) -> Result<()> {
        self.record(ApiCall::PostComment(
            comments_url.to_string(),
            body.to_string(),
        ));
        if self.failures.lock().unwrap().comments {
            return Err(anyhow!("comment rejected"));
        }
        Ok(())
    }

    async fn request_review(&self, pull_request_url: &str, reviewer: &str) -> Result<()> {
        self.record(ApiCall::RequestReview(
            pull_request_url.to_string(),
            reviewer.to_string(),
        ));
        if self
            .failures
            .lock()
            .unwrap()
            .review_requests
            .contains(pull_request_url)
        {
            return Err(anyhow!("review request rejected"));
        }
        Ok(())
    }

    fn search_issues<'a>(&'a self, query: &SearchQuery) -> BoxStream<'a, Result<IssueRecord>> {
        self.record(ApiCall::Search(query.to_string()));
        if self.failures.lock().unwrap().searches {
            return stream::iter(vec![Err(anyhow!("search unavailable"))]).boxed();
        }

        let repo_marker = format!("/repos/{}/", query.repo());
        let mut matches: Vec<IssueRecord> = self
            .issues
            .lock()
            .unwrap()
            .iter()
            .filter(|issue| issue.url.contains(&repo_marker))
            .map(|issue| self.refreshed(issue))
            .filter(|issue| query.labels().iter().all(|l| issue.has_label(l)))
            .collect();
        match query.sort() {
            SearchSort::UpdatedAsc => matches.sort_by_key(|i| i.updated_at),
            SearchSort::CreatedAsc => matches.sort_by_key(|i| i.created_at),
        }

        stream::iter(matches)
            .inspect(move |_| {
                self.pulled.fetch_add(1, Ordering::SeqCst);
            })
            .map(Ok)
            .boxed()
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.repositories.clone())
    }
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap()
}

/// A pull request in issue form, authored by [`AUTHOR_LOGIN`].
pub fn pull_request(
    repo: &str,
    number: u64,
    labels: &[&str],
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> IssueRecord {
    let issue_url = format!("https://api.github.com/repos/{}/issues/{}", repo, number);
    IssueRecord {
        id: 1000 + number,
        number,
        title: format!("PR {}", number),
        user: User {
            id: AUTHOR_ID,
            login: AUTHOR_LOGIN.to_string(),
        },
        labels: labels
            .iter()
            .map(|name| Label {
                name: name.to_string(),
            })
            .collect(),
        created_at,
        updated_at,
        comments_url: format!("{}/comments", issue_url),
        url: issue_url,
        issue_url: None,
        pull_request: Some(PullRequestLink {
            url: format!("https://api.github.com/repos/{}/pulls/{}", repo, number),
        }),
    }
}

pub fn issue_with_labels(number: u64, labels: &[&str]) -> IssueRecord {
    let now = fixed_now();
    pull_request(REPO, number, labels, now, now)
}
