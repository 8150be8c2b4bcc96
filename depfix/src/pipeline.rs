use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::status::Status;

/// Result of one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success(String),
    /// Success that does not replace the pipeline's final message.
    Hidden,
    /// Fatal; halts the pipeline.
    Failure(String),
    /// Halts the remaining stages without marking failure.
    Abort(String),
}

/// One named step over a shared context `C` and per-run parameters `P`.
#[async_trait]
pub trait Stage<C, P>: Send + Sync
where
    C: Send + Sync,
    P: Send + Sync,
{
    fn name(&self) -> &'static str;

    /// Gate evaluated right before `run`; a false result skips the stage.
    async fn run_when(&self, _ctx: &C, _params: &P) -> Result<bool> {
        Ok(true)
    }

    async fn run(&self, ctx: &C, params: &mut P) -> Result<StageOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Done,
    Failed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub terminal: Terminal,
    pub status: Status,
    pub executed: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

impl PipelineReport {
    pub fn ran(&self, stage: &str) -> bool {
        self.executed.contains(&stage)
    }
}

pub struct Pipeline<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    stages: Arc<Vec<Box<dyn Stage<C, P>>>>,
}

impl<C, P> Clone for Pipeline<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            stages: Arc::clone(&self.stages),
        }
    }
}

impl<C, P> Pipeline<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Run every stage in order. The final status is the last non-hidden
    /// success message, or the failure of the stage that halted the run.
    #[instrument(skip_all, fields(stage_count = self.stages.len()))]
    pub async fn run(&self, ctx: &C, params: &mut P) -> PipelineReport {
        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut last_success: Option<String> = None;

        for stage in self.stages.iter() {
            let name = stage.name();
            let outcome = match stage.run_when(ctx, params).await {
                Ok(false) => {
                    debug!(stage = name, "stage skipped");
                    skipped.push(name);
                    continue;
                }
                Ok(true) => {
                    executed.push(name);
                    match stage.run(ctx, params).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(stage = name, error = %e, "stage failed");
                            StageOutcome::Failure(format!("{name} failed: {e:#}"))
                        }
                    }
                }
                Err(e) => {
                    warn!(stage = name, error = %e, "stage gate failed");
                    executed.push(name);
                    StageOutcome::Failure(format!("{name} failed: {e:#}"))
                }
            };

            match outcome {
                StageOutcome::Success(message) => {
                    debug!(stage = name, "stage complete");
                    last_success = Some(message);
                }
                StageOutcome::Hidden => debug!(stage = name, "stage complete"),
                StageOutcome::Failure(message) => {
                    return PipelineReport {
                        terminal: Terminal::Failed,
                        status: Status::failure(message),
                        executed,
                        skipped,
                    };
                }
                StageOutcome::Abort(message) => {
                    debug!(stage = name, reason = %message, "pipeline aborted");
                    return PipelineReport {
                        terminal: Terminal::Aborted,
                        status: final_status(last_success, message),
                        executed,
                        skipped,
                    };
                }
            }
        }

        PipelineReport {
            terminal: Terminal::Done,
            status: final_status(last_success, String::new()),
            executed,
            skipped,
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

fn final_status(last_success: Option<String>, fallback: String) -> Status {
    match last_success {
        Some(message) => Status::success(message),
        None => Status::success(fallback).hidden(),
    }
}

pub struct PipelineBuilder<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    stages: Vec<Box<dyn Stage<C, P>>>,
}

impl<C, P> PipelineBuilder<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { stages: vec![] }
    }

    pub fn stage(mut self, stage: impl Stage<C, P> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn build(self) -> Pipeline<C, P> {
        Pipeline {
            stages: Arc::new(self.stages),
        }
    }
}

impl<C, P> Default for PipelineBuilder<C, P>
where
    C: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
