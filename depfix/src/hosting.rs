use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One remediable repository as seen by a fleet cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryHandle {
    pub owner: String,
    pub owner_id: String,
    pub repo_id: String,
    pub name: String,
    /// Default branch.
    pub branch: String,
}

impl RepositoryHandle {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepositoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// A commit pushed to a branch; the unit a remediation pipeline runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repo: RepositoryHandle,
    pub branch: String,
    pub sha: String,
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

impl PushEvent {
    pub fn is_default_branch(&self) -> bool {
        self.branch == self.repo.branch
    }
}

#[derive(Clone, Default)]
pub struct Credential {
    pub token: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub message: String,
    #[serde(rename = "annotation_level")]
    pub level: AnnotationLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Neutral,
    ActionRequired,
}

#[derive(Debug, Clone)]
pub struct NewCheck {
    pub name: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckHandle {
    pub id: u64,
    pub name: String,
    pub title: String,
    pub sha: String,
}

#[derive(Debug, Clone)]
pub struct CheckUpdate {
    pub conclusion: CheckConclusion,
    pub body: String,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct PullRequestSpec {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    /// False when an already open pull request was updated in place.
    pub created: bool,
}

/// Source control hosting operations used by the pipeline and the fleet.
#[async_trait]
pub trait Hosting: Send + Sync {
    async fn list_repositories(&self) -> Result<Vec<RepositoryHandle>>;

    async fn credential(&self, repo: &RepositoryHandle) -> Result<Credential>;

    /// Content of `path` on the repository's default branch.
    async fn file_content(&self, repo: &RepositoryHandle, path: &str) -> Result<String>;

    /// Head commit sha of `branch`.
    async fn head_commit(&self, repo: &RepositoryHandle, branch: &str) -> Result<String>;

    async fn create_check(&self, repo: &RepositoryHandle, sha: &str, check: NewCheck) -> Result<CheckHandle>;

    async fn update_check(&self, repo: &RepositoryHandle, check: &CheckHandle, update: CheckUpdate) -> Result<()>;

    /// Create a pull request or update the open one for the same head branch.
    async fn open_pull_request(&self, repo: &RepositoryHandle, spec: PullRequestSpec) -> Result<PullRequest>;

    /// Close open pull requests from `head` into `base` with a comment and
    /// delete the head branch. Returns how many were closed.
    async fn close_pull_requests(&self, repo: &RepositoryHandle, base: &str, head: &str, comment: &str)
    -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepositoryHandle {
        RepositoryHandle {
            owner: "acme".into(),
            owner_id: "1".into(),
            repo_id: "42".into(),
            name: "web".into(),
            branch: "main".into(),
        }
    }

    #[test]
    fn slug_and_display_agree() {
        assert_eq!(repo().slug(), "acme/web");
        assert_eq!(repo().to_string(), "acme/web");
    }

    #[test]
    fn default_branch_detection() {
        let mut event = PushEvent {
            repo: repo(),
            branch: "main".into(),
            sha: "abc".into(),
            author: None,
        };
        assert!(event.is_default_branch());
        event.branch = "feature".into();
        assert!(!event.is_default_branch());
    }

    #[test]
    fn credential_debug_redacts_token() {
        let cred = Credential {
            token: Some("ghp_secret".into()),
        };
        let dbg = format!("{cred:?}");
        assert!(!dbg.contains("ghp_secret"));
        assert!(dbg.contains("redacted"));
    }

    #[test]
    fn annotation_serializes_with_api_field_names() {
        let a = Annotation {
            path: "package.json".into(),
            start_line: 3,
            end_line: 3,
            message: "m".into(),
            level: AnnotationLevel::Warning,
        };
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["annotation_level"], "warning");
        assert_eq!(v["start_line"], 3);
    }
}
