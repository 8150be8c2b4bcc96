use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::config::{PersistMode, PushStrategy};
use crate::git::Checkout;
use crate::hosting::{Hosting, PullRequest, PullRequestSpec, PushEvent};

/// Changes sitting in a working tree, ready to be committed back.
#[derive(Debug, Clone)]
pub struct Changes {
    /// Branch used when the strategy resolves to a pull request.
    pub head: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    Skipped,
    Committed { branch: String },
    PullRequest(PullRequest),
}

impl Persisted {
    pub fn describe(&self, repo: &str) -> Option<String> {
        match self {
            Persisted::Skipped => None,
            Persisted::Committed { branch } => Some(format!("Pushed changes to {repo}@{branch}")),
            Persisted::PullRequest(pr) => Some(format!(
                "{} pull request [{repo}#{}]({})",
                if pr.created { "Opened" } else { "Updated" },
                pr.number,
                pr.url
            )),
        }
    }
}

/// Commit message carrying provenance markers that identify generated commits.
pub fn commit_message(subject: &str, config_name: &str) -> String {
    format!("{subject}\n\n[depfix:generated]\n[depfix-config:{config_name}]")
}

/// Persist the working tree per `strategy` against the event's branch: a
/// direct commit onto it, or a commit onto `changes.head` plus a pull request.
#[instrument(skip(hosting, checkout, event, changes), fields(repo = %event.repo, branch = %event.branch, head = %changes.head))]
pub async fn persist_changes(
    hosting: &dyn Hosting,
    checkout: &dyn Checkout,
    strategy: PushStrategy,
    event: &PushEvent,
    changes: Changes,
) -> Result<Persisted> {
    match strategy.resolve(event.is_default_branch()) {
        PersistMode::Skip => {
            debug!(%strategy, "push strategy does not apply to this branch");
            Ok(Persisted::Skipped)
        }
        PersistMode::Commit => {
            checkout
                .commit_and_push(&event.branch, &changes.message, event.author.as_ref())
                .await?;
            info!("committed changes");
            Ok(Persisted::Committed {
                branch: event.branch.clone(),
            })
        }
        PersistMode::PullRequest => {
            checkout
                .commit_and_push(&changes.head, &changes.message, event.author.as_ref())
                .await?;
            let pr = hosting
                .open_pull_request(
                    &event.repo,
                    PullRequestSpec {
                        head: changes.head,
                        base: event.branch.clone(),
                        title: changes.title,
                        body: changes.body,
                        labels: changes.labels,
                    },
                )
                .await?;
            info!(number = pr.number, created = pr.created, "pull request ready");
            Ok(Persisted::PullRequest(pr))
        }
    }
}
