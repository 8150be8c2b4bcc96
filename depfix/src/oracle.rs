use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::manifest::AuditRequest;

pub const REGISTRY_AUDIT_URL: &str = "https://registry.npmjs.org/-/npm/v1/security/audits";

/// External service computing vulnerabilities for a dependency graph.
#[async_trait]
pub trait AuditOracle: Send + Sync {
    async fn audit(&self, request: &AuditRequest) -> Result<Value>;
}

#[derive(Clone)]
pub struct RegistryOracle {
    client: reqwest::Client,
    url: String,
}

impl RegistryOracle {
    /// Oracle against the public registry, honoring `DEPFIX_AUDIT_URL`.
    pub fn new() -> Result<Self> {
        let url = std::env::var("DEPFIX_AUDIT_URL").unwrap_or_else(|_| REGISTRY_AUDIT_URL.to_string());
        Self::with_url(&url)
    }

    pub fn with_url(url: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .user_agent("depfix")
                .build()
                .context("failed to build HTTP client")?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AuditOracle for RegistryOracle {
    #[instrument(skip(self, request), fields(package = request.name.as_deref().unwrap_or("")))]
    async fn audit(&self, request: &AuditRequest) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{} returned HTTP {status}", self.url);
        }

        let json: Value = response
            .json()
            .await
            .context("failed to parse audit response")?;
        debug!("audit response received");
        Ok(json)
    }
}
