//! Reacting to comments on pull requests.
//!
//! Handling one comment happens in two phases. Admission decides whether the
//! pull request is opted in, or is being opted in by its author with the first
//! command of this comment. Evaluation then runs the remaining commands in
//! order against that decision.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::PlatformApi;
use crate::command::{parse_commands, Directive, Routed};
use crate::config::WorkflowConfig;
use crate::issue::{IssueRecord, Label, User};
use crate::status::{set_status, Status, StatusPlan, OPT_IN_LABEL};

pub const GREETING: &str = "\
Hi! I'm an experimental bot. My goal is to guide this PR through its stages, hopefully ending with a merge. The stages are

- `needs_review`, if the author considers this PR ready
- `needs_work` if the PR in its current form is not ready yet. Maybe the reviewer requested changes, there is an ongoing discussion or you are waiting for upstream feedback.
- `needs_merge` can be set by reviewers who do not have merge permission but *would merge this PR if they could*.

Anybody can switch the current state with a comment of the form `/status <new_state_here>`.

Feedback and contributions to this bot are [appreciated](https://github.com/timokau/marvin-mk2).";

pub const NO_SELF_REVIEW_TEXT: &str = "\
Sorry, you cannot set your own PR to `needs_merge`. Please wait for an external review. You may also actively search out a reviewer by pinging relevant people (look at the history of the files you're changing) or posting on discourse or IRC.";

/// A newly created comment on an issue or pull request.
#[derive(Debug, Clone, Copy)]
pub struct CommentEvent<'a> {
    pub body: &'a str,
    pub author: &'a User,
    pub issue: &'a IssueRecord,
}

impl CommentEvent<'_> {
    pub fn by_pr_author(&self) -> bool {
        self.author.id == self.issue.user.id
    }
}

/// Whether a comment may act on its pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The pull request already carries the opt-in label.
    OptedIn,
    /// The author opts in with the first command of this comment.
    OptingIn,
    Refused,
}

/// Decide admission from the state before any command runs.
pub fn admit(config: &WorkflowConfig, event: &CommentEvent<'_>, commands: &[&str]) -> Admission {
    if event.issue.has_label(OPT_IN_LABEL) {
        return Admission::OptedIn;
    }
    let first_is_opt_in = commands
        .first()
        .is_some_and(|c| config.router().route(c) == Routed::Directive(Directive::OptIn));
    if event.by_pr_author() && first_is_opt_in {
        Admission::OptingIn
    } else {
        Admission::Refused
    }
}

/// What one command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEffect {
    OptedIn,
    AlreadyOptedIn,
    StatusSet(Status),
    SelfMergeRefused,
    TriageRequested,
    Unrecognized(String),
}

/// Everything that happened while handling one comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// The comment was written by this bot.
    OwnComment,
    /// The pull request is not opted in and the comment did not opt it in.
    NotOptedIn,
    Processed(Vec<CommandEffect>),
}

impl Reaction {
    pub fn triage_requested(&self) -> bool {
        matches!(self, Reaction::Processed(effects) if effects.contains(&CommandEffect::TriageRequested))
    }
}

/// React to a freshly created comment.
///
/// Remote failures abort the remaining commands and are returned; commands
/// that don't route are logged and skipped.
pub async fn handle_comment(
    api: &dyn PlatformApi,
    config: &WorkflowConfig,
    event: &CommentEvent<'_>,
) -> Result<Reaction> {
    if config.is_own_login(&event.author.login) {
        return Ok(Reaction::OwnComment);
    }

    let commands: Vec<&str> = parse_commands(event.body).collect();
    let admission = admit(config, event, &commands);

    // Local view of the labels, kept current as commands mutate them.
    let mut issue = event.issue.clone();
    let mut effects = Vec::new();

    let remaining = match admission {
        Admission::Refused => return Ok(Reaction::NotOptedIn),
        Admission::OptedIn => &commands[..],
        Admission::OptingIn => {
            opt_in(api, &issue).await?;
            issue.labels.push(Label {
                name: OPT_IN_LABEL.to_string(),
            });
            effects.push(CommandEffect::OptedIn);
            &commands[1..]
        }
    };

    for command in remaining {
        let effect = match config.router().route(command) {
            Routed::Directive(directive) => {
                run_directive(api, &mut issue, event.by_pr_author(), directive).await?
            }
            Routed::Unrecognized(command) => {
                warn!("Unknown command on #{}: {}", issue.number, command);
                CommandEffect::Unrecognized(command)
            }
        };
        effects.push(effect);
    }

    Ok(Reaction::Processed(effects))
}

async fn opt_in(api: &dyn PlatformApi, issue: &IssueRecord) -> Result<()> {
    info!("#{} opted in by its author", issue.number);
    api.add_labels(issue.labels_target(), &[OPT_IN_LABEL])
        .await
        .context("Failed to add opt-in label")?;
    api.post_comment(&issue.comments_url, GREETING)
        .await
        .context("Failed to post greeting")?;
    Ok(())
}

async fn run_directive(
    api: &dyn PlatformApi,
    issue: &mut IssueRecord,
    by_pr_author: bool,
    directive: Directive,
) -> Result<CommandEffect> {
    match directive {
        Directive::OptIn => Ok(CommandEffect::AlreadyOptedIn),
        Directive::Triage => {
            info!("Triage requested from #{}", issue.number);
            Ok(CommandEffect::TriageRequested)
        }
        Directive::SetStatus(Status::NeedsMerge) if by_pr_author => {
            info!("Refusing self-review of #{}", issue.number);
            api.post_comment(&issue.comments_url, NO_SELF_REVIEW_TEXT)
                .await
                .context("Failed to post self-review refusal")?;
            Ok(CommandEffect::SelfMergeRefused)
        }
        Directive::SetStatus(status) => {
            set_status(api, issue, status).await?;
            apply_locally(issue, status);
            Ok(CommandEffect::StatusSet(status))
        }
    }
}

fn apply_locally(issue: &mut IssueRecord, status: Status) {
    let plan = StatusPlan::for_labels(issue.labels.iter().map(|l| l.name.as_str()), status);
    issue
        .labels
        .retain(|l| !plan.remove.iter().any(|s| s.label() == l.name));
    if let Some(added) = plan.add {
        issue.labels.push(Label {
            name: added.label().to_string(),
        });
    }
}
