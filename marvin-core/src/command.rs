/// Command parsing and routing for `/`-prefixed lines in comments
use std::collections::HashMap;
use std::fmt;

use crate::status::Status;

/// Character that marks a comment line as a command.
pub const COMMAND_PREFIX: char = '/';

/// Extract commands from a comment body.
///
/// A line is a command if it starts with the prefix. Exactly one prefix
/// character is stripped and the rest is trimmed, so `//test` yields `/test`.
/// Other lines are dropped. The iterator is lazy and borrows from `text`.
pub fn parse_commands(text: &str) -> impl Iterator<Item = &str> + '_ {
    text.lines()
        .filter_map(|line| line.strip_prefix(COMMAND_PREFIX))
        .map(str::trim)
}

/// A recognized comment directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Enable the workflow on a pull request
    OptIn,
    /// Move the pull request to a human-settable status
    SetStatus(Status),
    /// Run triage now
    Triage,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::OptIn => write!(f, "marvin opt-in"),
            Directive::SetStatus(status) => write!(f, "status {}", status),
            Directive::Triage => write!(f, "marvin triage"),
        }
    }
}

/// Result of looking up a command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed<D> {
    Directive(D),
    Unrecognized(String),
}

/// Exact-match table from command strings to directives.
///
/// Built once through [`CommandRouterBuilder`] and immutable afterwards.
#[derive(Debug, Clone)]
pub struct CommandRouter<D> {
    routes: HashMap<String, D>,
}

#[derive(Debug)]
pub struct CommandRouterBuilder<D> {
    routes: HashMap<String, D>,
}

impl<D: Clone> CommandRouter<D> {
    pub fn builder() -> CommandRouterBuilder<D> {
        CommandRouterBuilder {
            routes: HashMap::new(),
        }
    }

    /// Look up `command` by exact string equality.
    pub fn route(&self, command: &str) -> Routed<D> {
        match self.routes.get(command) {
            Some(directive) => Routed::Directive(directive.clone()),
            None => Routed::Unrecognized(command.to_string()),
        }
    }

    pub fn commands(&self) -> impl Iterator<Item = (&str, &D)> {
        self.routes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<D> CommandRouterBuilder<D> {
    /// Register `command`. A later registration of the same string replaces
    /// the earlier one.
    pub fn register(mut self, command: impl Into<String>, directive: D) -> Self {
        self.routes.insert(command.into(), directive);
        self
    }

    pub fn build(self) -> CommandRouter<D> {
        CommandRouter {
            routes: self.routes,
        }
    }
}

impl CommandRouter<Directive> {
    /// The directives marvin understands in comments.
    pub fn standard() -> Self {
        let mut builder = Self::builder()
            .register(Directive::OptIn.to_string(), Directive::OptIn)
            .register(Directive::Triage.to_string(), Directive::Triage);
        for status in Status::ALL.into_iter().filter(|s| s.is_human_settable()) {
            let directive = Directive::SetStatus(status);
            builder = builder.register(directive.to_string(), directive);
        }
        builder.build()
    }
}
