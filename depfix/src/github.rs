use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::hosting::{
    CheckHandle, CheckUpdate, Credential, Hosting, NewCheck, PullRequest, PullRequestSpec, RepositoryHandle,
};

pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const GITHUB_RAW_BASE: &str = "https://raw.githubusercontent.com";

/// The check runs API accepts at most this many annotations per request.
const ANNOTATION_CHUNK: usize = 50;

fn api_base() -> String {
    std::env::var("DEPFIX_API_BASE_URL").unwrap_or_else(|_| GITHUB_API_BASE.to_string())
}

fn raw_base() -> String {
    std::env::var("DEPFIX_RAW_BASE_URL").unwrap_or_else(|_| GITHUB_RAW_BASE.to_string())
}

#[derive(Deserialize)]
struct RawOwner {
    login: String,
    id: u64,
}

#[derive(Deserialize)]
struct RawRepository {
    id: u64,
    name: String,
    owner: RawOwner,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    archived: bool,
}

#[derive(Deserialize)]
struct RawPull {
    number: u64,
    html_url: String,
}

#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
    raw_base: String,
}

impl GitHubClient {
    /// Client against github.com, honoring `DEPFIX_API_BASE_URL` and
    /// `DEPFIX_RAW_BASE_URL` overrides.
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_base_urls(token, &api_base(), &raw_base())
    }

    pub fn with_base_urls(token: Option<String>, api_base: &str, raw_base: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .user_agent("depfix")
                .build()
                .context("failed to build HTTP client")?,
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
            raw_base: raw_base.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        request
    }

    #[instrument(skip(self))]
    async fn api_get_optional(&self, url: &str) -> Result<Option<Value>> {
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            bail!("{url} returned HTTP {status}");
        }

        let json = response
            .json()
            .await
            .with_context(|| format!("failed to parse JSON from {url}"))?;
        Ok(Some(json))
    }

    #[instrument(skip(self))]
    pub async fn api_get(&self, url: &str) -> Result<Value> {
        self.api_get_optional(url)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{url} returned HTTP 404"))
    }

    #[instrument(skip(self, body))]
    async fn api_send(&self, method: Method, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .request(method.clone(), url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{method} {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{method} {url} returned HTTP {status}");
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to parse JSON from {url}"))
    }

    /// Fetch raw file content via the raw content host.
    #[instrument(skip(self))]
    pub async fn get_raw_content(&self, owner: &str, repo: &str, git_ref: &str, path: &str) -> Result<String> {
        let url = format!("{}/{owner}/{repo}/{git_ref}/{path}", self.raw_base);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            bail!("{path} not found in {owner}/{repo}@{git_ref}");
        }
        if !status.is_success() {
            bail!("{url} returned HTTP {status}");
        }

        response
            .text()
            .await
            .with_context(|| format!("failed to read body from {url}"))
    }

    async fn open_pulls(&self, repo: &RepositoryHandle, base: &str, head: &str) -> Result<Vec<RawPull>> {
        let url = format!(
            "{}/repos/{}/{}/pulls?state=open&head={}:{head}&base={base}",
            self.api_base, repo.owner, repo.name, repo.owner
        );
        let json = self.api_get(&url).await?;
        serde_json::from_value(json).context("unexpected pull request list shape")
    }

    fn repo_url(&self, repo: &RepositoryHandle) -> String {
        format!("{}/repos/{}/{}", self.api_base, repo.owner, repo.name)
    }
}

#[async_trait]
impl Hosting for GitHubClient {
    #[instrument(skip(self))]
    async fn list_repositories(&self) -> Result<Vec<RepositoryHandle>> {
        let mut repos = Vec::new();
        for page in 1.. {
            let url = format!("{}/user/repos?per_page=100&page={page}", self.api_base);
            let json = self.api_get(&url).await?;
            let batch: Vec<RawRepository> =
                serde_json::from_value(json).context("unexpected repository list shape")?;
            if batch.is_empty() {
                break;
            }
            repos.extend(batch.into_iter().filter(|r| !r.archived).map(|r| RepositoryHandle {
                owner: r.owner.login,
                owner_id: r.owner.id.to_string(),
                repo_id: r.id.to_string(),
                name: r.name,
                branch: r.default_branch.unwrap_or_else(|| "main".to_string()),
            }));
        }
        debug!(count = repos.len(), "listed repositories");
        Ok(repos)
    }

    async fn credential(&self, _repo: &RepositoryHandle) -> Result<Credential> {
        Ok(Credential {
            token: self.token.clone(),
        })
    }

    async fn file_content(&self, repo: &RepositoryHandle, path: &str) -> Result<String> {
        self.get_raw_content(&repo.owner, &repo.name, &repo.branch, path).await
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn head_commit(&self, repo: &RepositoryHandle, branch: &str) -> Result<String> {
        let url = format!("{}/branches/{branch}", self.repo_url(repo));
        let json = self.api_get(&url).await?;
        json.get("commit")
            .and_then(|c| c.get("sha"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .with_context(|| format!("missing commit sha for {repo}@{branch}"))
    }

    #[instrument(skip(self, repo, check), fields(repo = %repo, name = %check.name))]
    async fn create_check(&self, repo: &RepositoryHandle, sha: &str, check: NewCheck) -> Result<CheckHandle> {
        let url = format!("{}/check-runs", self.repo_url(repo));
        let body = json!({
            "name": check.name,
            "head_sha": sha,
            "status": "in_progress",
            "output": { "title": check.title, "summary": check.body },
        });
        let json = self.api_send(Method::POST, &url, &body).await?;
        let id = json
            .get("id")
            .and_then(|v| v.as_u64())
            .context("missing 'id' in check run response")?;
        Ok(CheckHandle {
            id,
            name: check.name,
            title: check.title,
            sha: sha.to_string(),
        })
    }

    #[instrument(skip(self, repo, update), fields(repo = %repo, check = check.id))]
    async fn update_check(&self, repo: &RepositoryHandle, check: &CheckHandle, update: CheckUpdate) -> Result<()> {
        let url = format!("{}/check-runs/{}", self.repo_url(repo), check.id);
        let mut chunks: Vec<_> = update.annotations.chunks(ANNOTATION_CHUNK).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        for chunk in chunks {
            let body = json!({
                "status": "completed",
                "conclusion": update.conclusion,
                "output": {
                    "title": check.title,
                    "summary": update.body,
                    "annotations": chunk,
                },
            });
            self.api_send(Method::PATCH, &url, &body).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, repo, spec), fields(repo = %repo, head = %spec.head))]
    async fn open_pull_request(&self, repo: &RepositoryHandle, spec: PullRequestSpec) -> Result<PullRequest> {
        let existing = self.open_pulls(repo, &spec.base, &spec.head).await?;
        let (raw, created) = match existing.into_iter().next() {
            Some(pr) => {
                let url = format!("{}/pulls/{}", self.repo_url(repo), pr.number);
                let body = json!({ "title": spec.title, "body": spec.body });
                self.api_send(Method::PATCH, &url, &body).await?;
                (pr, false)
            }
            None => {
                let url = format!("{}/pulls", self.repo_url(repo));
                let body = json!({
                    "title": spec.title,
                    "head": spec.head,
                    "base": spec.base,
                    "body": spec.body,
                });
                let json = self.api_send(Method::POST, &url, &body).await?;
                let pr: RawPull = serde_json::from_value(json).context("unexpected pull request shape")?;
                (pr, true)
            }
        };

        if !spec.labels.is_empty() {
            let url = format!("{}/issues/{}/labels", self.repo_url(repo), raw.number);
            self.api_send(Method::POST, &url, &json!({ "labels": spec.labels }))
                .await?;
        }

        Ok(PullRequest {
            number: raw.number,
            url: raw.html_url,
            created,
        })
    }

    #[instrument(skip(self, repo, comment), fields(repo = %repo))]
    async fn close_pull_requests(
        &self,
        repo: &RepositoryHandle,
        base: &str,
        head: &str,
        comment: &str,
    ) -> Result<usize> {
        let open = self.open_pulls(repo, base, head).await?;
        if open.is_empty() {
            return Ok(0);
        }
        for pr in &open {
            let comments = format!("{}/issues/{}/comments", self.repo_url(repo), pr.number);
            self.api_send(Method::POST, &comments, &json!({ "body": comment }))
                .await?;
            let url = format!("{}/pulls/{}", self.repo_url(repo), pr.number);
            self.api_send(Method::PATCH, &url, &json!({ "state": "closed" }))
                .await?;
        }

        let ref_url = format!("{}/git/refs/heads/{head}", self.repo_url(repo));
        let response = self
            .request(Method::DELETE, &ref_url)
            .send()
            .await
            .with_context(|| format!("DELETE {ref_url} failed"))?;
        if !response.status().is_success() {
            warn!(branch = head, status = %response.status(), "failed to delete branch");
        }
        Ok(open.len())
    }
}
