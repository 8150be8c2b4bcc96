#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use depfix::context::Services;
use depfix::git::{Checkout, CheckoutProvider, GitStatus};
use depfix::hosting::{
    CheckHandle, CheckUpdate, CommitAuthor, Credential, Hosting, NewCheck, PullRequest, PullRequestSpec, PushEvent,
    RepositoryHandle,
};
use depfix::manifest::{AuditRequest, LOCK_FILE, MANIFEST_FILE};
use depfix::npm::{CommandOutput, PackageManager};
use depfix::oracle::AuditOracle;
use depfix::store::JsonFileStore;

pub const HEAD_SHA: &str = "4f2a9c1e7b3d";

pub const MANIFEST: &str = r#"{
  "name": "app",
  "version": "1.0.0",
  "dependencies": {
    "lodash": "^4.17.15"
  },
  "devDependencies": {
    "jest": "^26.0.0"
  }
}"#;

pub const LOCK: &str = r#"{"name":"app","lockfileVersion":1,"dependencies":{"lodash":{"version":"4.17.15"}}}"#;

pub fn repo(id: &str, owner: &str, name: &str) -> RepositoryHandle {
    RepositoryHandle {
        owner: owner.into(),
        owner_id: "100".into(),
        repo_id: id.into(),
        name: name.into(),
        branch: "main".into(),
    }
}

pub fn push_event(repo: RepositoryHandle, branch: &str) -> PushEvent {
    PushEvent {
        repo,
        branch: branch.into(),
        sha: HEAD_SHA.into(),
        author: Some(CommitAuthor {
            name: "Dev".into(),
            email: "dev@example.com".into(),
        }),
    }
}

pub fn clean_report() -> String {
    json!({
        "runId": "run-clean",
        "actions": [],
        "advisories": {},
        "metadata": {"vulnerabilities": {"info": 0, "low": 0, "moderate": 0, "high": 0, "critical": 0}}
    })
    .to_string()
}

/// One moderate lodash advisory fixable by installing 4.17.21.
pub fn lodash_report(is_major: bool, run_id: &str) -> String {
    json!({
        "runId": run_id,
        "actions": [{
            "isMajor": is_major,
            "action": "install",
            "module": "lodash",
            "target": if is_major { "5.0.0" } else { "4.17.21" },
            "resolves": [{"id": 1523, "path": "lodash", "dev": false}]
        }],
        "advisories": {
            "1523": {
                "id": 1523,
                "module_name": "lodash",
                "vulnerable_versions": "<4.17.19",
                "severity": "moderate",
                "title": "Prototype Pollution",
                "findings": [{"version": "4.17.15", "paths": ["lodash"]}],
                "cves": ["CVE-2020-8203"],
                "url": "https://npmjs.com/advisories/1523",
                "recommendation": "Update to version 4.17.19 or later.",
                "updated": "2020-07-29T23:06:25.434Z"
            }
        },
        "metadata": {"vulnerabilities": {"info": 0, "low": 0, "moderate": 1, "high": 0, "critical": 0}}
    })
    .to_string()
}

// ─── Hosting ───

#[derive(Default)]
pub struct FakeHosting {
    pub repos: Vec<RepositoryHandle>,
    /// Repository ids whose file reads fail.
    pub unreadable: HashSet<String>,
    /// Head branches with an open pull request.
    pub open_heads: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<String>>,
    pub check_updates: Mutex<Vec<CheckUpdate>>,
    pub pull_requests: Mutex<Vec<PullRequestSpec>>,
}

impl FakeHosting {
    pub fn with_repos(repos: Vec<RepositoryHandle>) -> Self {
        Self {
            repos,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(prefix)).collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Hosting for FakeHosting {
    async fn list_repositories(&self) -> Result<Vec<RepositoryHandle>> {
        Ok(self.repos.clone())
    }

    async fn credential(&self, _repo: &RepositoryHandle) -> Result<Credential> {
        Ok(Credential {
            token: Some("test-token".into()),
        })
    }

    async fn file_content(&self, repo: &RepositoryHandle, path: &str) -> Result<String> {
        self.record(format!("file:{}:{path}", repo.slug()));
        if self.unreadable.contains(&repo.repo_id) {
            bail!("GitHub API 500 for {path}");
        }
        match path {
            MANIFEST_FILE => Ok(MANIFEST.to_string()),
            LOCK_FILE => Ok(LOCK.to_string()),
            _ => bail!("file not found: {path}"),
        }
    }

    async fn head_commit(&self, _repo: &RepositoryHandle, _branch: &str) -> Result<String> {
        Ok(HEAD_SHA.to_string())
    }

    async fn create_check(&self, _repo: &RepositoryHandle, sha: &str, check: NewCheck) -> Result<CheckHandle> {
        self.record(format!("create_check:{}", check.name));
        Ok(CheckHandle {
            id: 1,
            name: check.name,
            title: check.title,
            sha: sha.to_string(),
        })
    }

    async fn update_check(&self, _repo: &RepositoryHandle, _check: &CheckHandle, update: CheckUpdate) -> Result<()> {
        self.record(format!("update_check:{:?}", update.conclusion));
        self.check_updates.lock().unwrap().push(update);
        Ok(())
    }

    async fn open_pull_request(&self, repo: &RepositoryHandle, spec: PullRequestSpec) -> Result<PullRequest> {
        self.record(format!("open_pr:{}", spec.head));
        let mut open = self.open_heads.lock().unwrap();
        let created = !open.contains(&spec.head);
        if created {
            open.push(spec.head.clone());
        }
        let number = open.iter().position(|h| *h == spec.head).unwrap_or(0) as u64 + 1;
        self.pull_requests.lock().unwrap().push(spec);
        Ok(PullRequest {
            number,
            url: format!("https://github.com/{}/pull/{number}", repo.slug()),
            created,
        })
    }

    async fn close_pull_requests(
        &self,
        _repo: &RepositoryHandle,
        _base: &str,
        head: &str,
        _comment: &str,
    ) -> Result<usize> {
        self.record(format!("close_pr:{head}"));
        let mut open = self.open_heads.lock().unwrap();
        let before = open.len();
        open.retain(|h| h != head);
        Ok(before - open.len())
    }
}

// ─── Checkouts ───

pub struct FakeCheckout {
    dir: TempDir,
    dirty: Arc<AtomicBool>,
    pushes: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Checkout for FakeCheckout {
    fn path(&self) -> &Path {
        self.dir.path()
    }

    async fn status(&self) -> Result<GitStatus> {
        Ok(GitStatus {
            sha: HEAD_SHA.to_string(),
            is_clean: !self.dirty.load(Ordering::SeqCst),
        })
    }

    async fn commit_and_push(&self, branch: &str, message: &str, _author: Option<&CommitAuthor>) -> Result<()> {
        let subject = message.lines().next().unwrap_or_default();
        self.pushes.lock().unwrap().push(format!("{branch}: {subject}"));
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out temporary working copies holding [`MANIFEST`] and, unless
/// disabled, [`LOCK`].
pub struct FakeCheckouts {
    pub with_lock: AtomicBool,
    pub dirty: Arc<AtomicBool>,
    pub pushes: Arc<Mutex<Vec<String>>>,
    pub clones: Mutex<Vec<String>>,
}

impl FakeCheckouts {
    pub fn new(dirty: Arc<AtomicBool>) -> Self {
        Self {
            with_lock: AtomicBool::new(true),
            dirty,
            pushes: Arc::default(),
            clones: Mutex::default(),
        }
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckoutProvider for FakeCheckouts {
    async fn checkout(
        &self,
        repo: &RepositoryHandle,
        branch: &str,
        _credential: &Credential,
        _in_place: bool,
    ) -> Result<Box<dyn Checkout>> {
        self.clones.lock().unwrap().push(format!("{}@{branch}", repo.slug()));
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(MANIFEST_FILE), MANIFEST)?;
        if self.with_lock.load(Ordering::SeqCst) {
            std::fs::write(dir.path().join(LOCK_FILE), LOCK)?;
        }
        self.dirty.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeCheckout {
            dir,
            dirty: self.dirty.clone(),
            pushes: self.pushes.clone(),
        }))
    }
}

// ─── npm ───

/// Scripted npm: `audit` answers from a queue whose last entry repeats,
/// `install`/`update` dirty the working tree unless listed in `failing`.
pub struct FakeNpm {
    audits: Mutex<VecDeque<String>>,
    pub outdated: Mutex<String>,
    pub failing: Mutex<Vec<String>>,
    dirty: Arc<AtomicBool>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl FakeNpm {
    pub fn new(dirty: Arc<AtomicBool>) -> Self {
        Self {
            audits: Mutex::new(VecDeque::new()),
            outdated: Mutex::new("{}".to_string()),
            failing: Mutex::default(),
            dirty,
            calls: Mutex::default(),
        }
    }

    pub fn set_audits(&self, audits: Vec<String>) {
        *self.audits.lock().unwrap() = audits.into();
    }

    pub fn set_outdated(&self, outdated: Value) {
        *self.outdated.lock().unwrap() = outdated.to_string();
    }

    pub fn fail(&self, command: &str) {
        self.failing.lock().unwrap().push(command.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.join(" ")).collect()
    }

    fn next_audit(&self) -> String {
        let mut audits = self.audits.lock().unwrap();
        if audits.len() > 1 {
            audits.pop_front().unwrap_or_else(clean_report)
        } else {
            audits.front().cloned().unwrap_or_else(clean_report)
        }
    }
}

#[async_trait]
impl PackageManager for FakeNpm {
    async fn run(&self, _cwd: &Path, args: &[String]) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(args.to_vec());
        let command = args.first().cloned().unwrap_or_default();
        if self.failing.lock().unwrap().contains(&command) {
            return Ok(CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: format!("npm ERR! {command} failed"),
            });
        }
        let stdout = match command.as_str() {
            "audit" => self.next_audit(),
            "outdated" => self.outdated.lock().unwrap().clone(),
            "install" | "update" => {
                self.dirty.store(true, Ordering::SeqCst);
                String::new()
            }
            _ => String::new(),
        };
        Ok(CommandOutput {
            status: 0,
            stdout,
            stderr: String::new(),
        })
    }
}

// ─── Oracle ───

pub struct FakeOracle {
    pub report: Mutex<Value>,
    pub requests: Mutex<Vec<AuditRequest>>,
}

impl FakeOracle {
    pub fn new() -> Self {
        Self {
            report: Mutex::new(serde_json::from_str(&clean_report()).unwrap()),
            requests: Mutex::default(),
        }
    }

    pub fn set_report(&self, report: &str) {
        *self.report.lock().unwrap() = serde_json::from_str(report).unwrap();
    }
}

#[async_trait]
impl AuditOracle for FakeOracle {
    async fn audit(&self, request: &AuditRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.report.lock().unwrap().clone())
    }
}

// ─── World ───

/// Every collaborator faked except the state and fingerprint store, which is
/// the JSON file store over a temporary directory.
pub struct World {
    pub hosting: Arc<FakeHosting>,
    pub checkouts: Arc<FakeCheckouts>,
    pub npm: Arc<FakeNpm>,
    pub oracle: Arc<FakeOracle>,
    pub store: Arc<JsonFileStore>,
    _state_dir: TempDir,
}

impl World {
    pub fn new(hosting: FakeHosting) -> Self {
        let dirty = Arc::new(AtomicBool::new(false));
        let state_dir = tempfile::tempdir().unwrap();
        Self {
            hosting: Arc::new(hosting),
            checkouts: Arc::new(FakeCheckouts::new(dirty.clone())),
            npm: Arc::new(FakeNpm::new(dirty)),
            oracle: Arc::new(FakeOracle::new()),
            store: Arc::new(JsonFileStore::new(state_dir.path())),
            _state_dir: state_dir,
        }
    }

    pub fn services(&self) -> Services {
        Services {
            hosting: self.hosting.clone(),
            checkouts: self.checkouts.clone(),
            npm: self.npm.clone(),
            oracle: self.oracle.clone(),
            fingerprints: self.store.clone(),
            state: self.store.clone(),
        }
    }
}
