pub mod assess;
pub mod config;
pub mod context;
pub mod fingerprint;
pub mod fleet;
pub mod git;
pub mod github;
pub mod guards;
pub mod hosting;
pub mod manifest;
pub mod npm;
pub mod oracle;
pub mod outdated;
pub mod persist;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod severity;
pub mod stages;
pub mod status;
pub mod store;
pub mod triggers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use context::Services;
use git::GitCheckouts;
use github::GitHubClient;
use npm::NpmCli;
use oracle::RegistryOracle;
use store::JsonFileStore;

/// Production collaborators: GitHub over REST, the `git` and `npm` CLIs, the
/// registry audit endpoint and JSON documents under `state_dir`. In-place
/// runs use the working copy at `workdir`.
pub fn production_services(
    token: Option<String>,
    state_dir: impl Into<PathBuf>,
    workdir: impl Into<PathBuf>,
) -> Result<Services> {
    let store = Arc::new(JsonFileStore::new(state_dir));
    Ok(Services {
        hosting: Arc::new(GitHubClient::new(token)?),
        checkouts: Arc::new(GitCheckouts::new(workdir)),
        npm: Arc::new(NpmCli::new()),
        oracle: Arc::new(RegistryOracle::new()?),
        fingerprints: store.clone(),
        state: store,
    })
}
