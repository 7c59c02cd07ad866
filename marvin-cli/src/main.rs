use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use tracing::{warn, Level};

use marvin_core::config::DEFAULT_BOT_NAME;
use marvin_core::github::DEFAULT_API_URL;
use marvin_core::{
    parse_commands, sweep_installations, GitHubClient, Pass, PlatformApi, Routed, RosterSelector,
    Triage, TriageReport, WorkflowConfig,
};

/// Marvin: pull request status labels and reviewer triage
#[derive(Parser, Debug)]
#[command(name = "marvin")]
#[command(about = "Operator tool for the marvin review bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show how marvin would interpret a comment
    Parse(ParseArgs),
    /// Print the search queries a triage run issues for a repository
    Queries(QueriesArgs),
    /// Run one triage sweep now
    Triage(TriageArgs),
}

#[derive(Parser, Debug)]
struct ParseArgs {
    /// File containing the comment body (reads stdin if omitted)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Bot name commands are addressed to
    #[arg(long, env = "BOT_NAME", default_value = DEFAULT_BOT_NAME)]
    bot_name: String,
}

#[derive(Parser, Debug)]
struct QueriesArgs {
    /// Repository in owner/name form
    repo: String,
}

#[derive(Parser, Debug)]
struct TriageArgs {
    /// Only triage this repository (owner/name)
    #[arg(long)]
    repo: Option<String>,

    /// Token to use instead of GitHub App credentials
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GitHub App id
    #[arg(long, env = "GH_APP_ID")]
    app_id: Option<u64>,

    /// GitHub App private key (PEM)
    #[arg(long, env = "GH_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// File containing the GitHub App private key
    #[arg(long, env = "GH_PRIVATE_KEY_FILE")]
    private_key_file: Option<PathBuf>,

    /// Comma-separated reviewer logins
    #[arg(long, env = "MARVIN_REVIEWERS", default_value = "")]
    reviewers: String,

    /// Comma-separated merger logins
    #[arg(long, env = "MARVIN_MERGERS", default_value = "")]
    mergers: String,

    #[arg(long, env = "BOT_NAME", default_value = DEFAULT_BOT_NAME)]
    bot_name: String,

    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,
}

/// One line per command: the command and what it routes to.
fn describe_commands(config: &WorkflowConfig, body: &str) -> Vec<String> {
    parse_commands(body)
        .map(|command| match config.router().route(command) {
            Routed::Directive(directive) => format!("/{}  ->  {}", command, directive),
            Routed::Unrecognized(_) => format!("/{}  ->  (unrecognized)", command),
        })
        .collect()
}

fn describe_queries(repo: &str) -> Vec<String> {
    Pass::ORDER
        .iter()
        .map(|pass| format!("{:<20} {}", pass.to_string(), pass.query(repo)))
        .collect()
}

fn run_parse(args: ParseArgs) -> Result<()> {
    let body = match &args.file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("Failed to read comment from stdin")?;
            body
        }
    };

    let config = WorkflowConfig::new(args.bot_name);
    let lines = describe_commands(&config, &body);
    if lines.is_empty() {
        println!("No commands found.");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn run_queries(args: QueriesArgs) -> Result<()> {
    if !args.repo.contains('/') {
        return Err(anyhow!("Repository must be given as owner/name"));
    }
    for line in describe_queries(&args.repo) {
        println!("{}", line);
    }
    Ok(())
}

async fn run_triage(args: TriageArgs) -> Result<()> {
    let selector = RosterSelector::new(
        RosterSelector::parse_roster(&args.reviewers),
        RosterSelector::parse_roster(&args.mergers),
    );
    if selector.is_empty() {
        warn!("No reviewers configured; assignment passes will skip every pull request");
    }
    let workflow = WorkflowConfig::new(args.bot_name.clone());
    let now = Utc::now();

    let report = match &args.token {
        Some(token) => {
            // Any app id and key will do; a fixed token never needs a JWT.
            let github = GitHubClient::with_api_base(0, String::new(), &args.api_url)?;
            let api = github.with_token(token.clone());
            let triage = Triage::new(&api, &selector, &workflow);
            match &args.repo {
                Some(repo) => TriageReport {
                    repositories: vec![triage.run_repository(repo, now).await],
                },
                None => triage.run(now).await?,
            }
        }
        None => {
            let github = app_client(&args)?;
            match &args.repo {
                Some(repo) => triage_one_repository(&github, &selector, &workflow, repo).await?,
                None => sweep_installations(&github, &selector, &workflow, now).await?,
            }
        }
    };

    print_report(&report);
    Ok(())
}

fn app_client(args: &TriageArgs) -> Result<GitHubClient> {
    let app_id = args
        .app_id
        .ok_or_else(|| anyhow!("Set GH_APP_ID or pass --token"))?;
    let private_key = match (&args.private_key, &args.private_key_file) {
        (Some(key), _) => key.replace("\\n", "\n"),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .trim()
            .to_string(),
        (None, None) => {
            return Err(anyhow!(
                "You need to set either GH_PRIVATE_KEY or GH_PRIVATE_KEY_FILE."
            ))
        }
    };
    GitHubClient::with_api_base(app_id, private_key, &args.api_url)
}

/// Find the installation that can see `repo` and triage only that repository.
async fn triage_one_repository(
    github: &GitHubClient,
    selector: &RosterSelector,
    workflow: &WorkflowConfig,
    repo: &str,
) -> Result<TriageReport> {
    for installation in github.list_installations().await? {
        let api = github.installation(installation.id);
        let repositories = api
            .list_repositories()
            .await
            .with_context(|| format!("Failed to list repositories of {}", installation.id))?;
        if let Some(found) = repositories
            .iter()
            .find(|r| r.full_name.eq_ignore_ascii_case(repo))
        {
            let triage = Triage::new(&api, selector, workflow);
            return Ok(TriageReport {
                repositories: vec![triage.run_repository(&found.full_name, Utc::now()).await],
            });
        }
    }
    Err(anyhow!("No installation of the app can access {}", repo))
}

fn print_report(report: &TriageReport) {
    for repository in &report.repositories {
        println!("{}", repository.repository);
        for (pass, result) in &repository.passes {
            let mut line = format!(
                "  {:<20} visited {:>3}, transitioned {:?}",
                pass.to_string(),
                result.visited,
                result.transitioned
            );
            if !result.skipped.is_empty() {
                line.push_str(&format!(", skipped {:?}", result.skipped));
            }
            if !result.failed.is_empty() {
                line.push_str(&format!(", failed {:?}", result.failed));
            }
            if result.search_failed {
                line.push_str(", search failed");
            }
            println!("{}", line);
        }
    }
    println!(
        "{} transition(s), {} failure(s)",
        report.transitioned(),
        report.failed()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse(args) => run_parse(args),
        Commands::Queries(args) => run_queries(args),
        Commands::Triage(args) => run_triage(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_describe_commands() {
        let config = WorkflowConfig::default();
        let body = "Thanks!\n/status needs_work\n/marvin triage\n/lgtm\n";
        assert_eq!(
            describe_commands(&config, body),
            vec![
                "/status needs_work  ->  status needs_work",
                "/marvin triage  ->  marvin triage",
                "/lgtm  ->  (unrecognized)",
            ]
        );
    }

    #[test]
    fn test_describe_queries_in_pass_order() {
        let lines = describe_queries("o/r");
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with(&Pass::ReviewerTimeout.to_string()));
        assert!(lines[0].ends_with("sort:updated-asc"));
        assert!(lines[3].ends_with("sort:created-asc"));
        assert!(lines.iter().all(|l| l.contains("repo:o/r is:open is:pr")));
    }

    #[test]
    fn test_triage_args_from_command_line() {
        let cli = Cli::try_parse_from([
            "marvin",
            "triage",
            "--repo",
            "o/r",
            "--token",
            "t",
            "--reviewers",
            "alice,bob",
        ])
        .unwrap();
        match cli.command {
            Commands::Triage(args) => {
                assert_eq!(args.repo.as_deref(), Some("o/r"));
                assert_eq!(args.token.as_deref(), Some("t"));
                assert_eq!(RosterSelector::parse_roster(&args.reviewers), ["alice", "bob"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
