//! One notification in, one submitted pipeline out.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use votefile_core::Config;

use crate::catalog::WorkLayout;
use crate::dag::DagBuilder;
use crate::error::PipelineError;
use crate::event::EventInterpreter;
use crate::submitter::{BatchBackend, JobSubmitter, SubmittedJob};
use crate::tags::TagLookup;

/// Outcome of a fully submitted pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub bucket: String,
    pub key: String,
    pub jurisdiction: String,
    pub reporter: u32,
    pub report_date: String,
    pub compressed: bool,
    pub jobs: Vec<SubmittedJob>,
}

pub struct Orchestrator {
    interpreter: EventInterpreter,
    builder: DagBuilder,
    submitter: JobSubmitter,
}

impl Orchestrator {
    pub fn new(interpreter: EventInterpreter, builder: DagBuilder, submitter: JobSubmitter) -> Self {
        Self {
            interpreter,
            builder,
            submitter,
        }
    }

    pub fn from_config(
        config: &Config,
        tags: Arc<dyn TagLookup>,
        backend: Arc<dyn BatchBackend>,
    ) -> Self {
        Self::new(
            EventInterpreter::new(tags, config.reporters.clone(), &config.pipeline.jurisdiction_tag),
            DagBuilder::new(WorkLayout::from(&config.pipeline)),
            JobSubmitter::new(backend, config.batch.clone()),
        )
    }

    /// Interpret `notification`, build its DAG and submit every stage.
    ///
    /// Nothing is submitted unless interpretation and DAG construction both
    /// succeed.
    pub async fn handle(&self, notification: &Value) -> Result<PipelineRun, PipelineError> {
        let params = self.interpreter.interpret(notification).await?;
        let mut dag = self.builder.build(&params)?;

        info!(
            run_id = %dag.run_id(),
            stages = dag.len(),
            jurisdiction = %params.jurisdiction,
            compressed = params.compressed,
            "Pipeline built"
        );

        let jobs = self.submitter.submit(&mut dag).await?;

        info!(run_id = %dag.run_id(), jobs = jobs.len(), "Pipeline submitted");

        Ok(PipelineRun {
            run_id: dag.run_id(),
            bucket: params.bucket,
            key: params.source_key,
            jurisdiction: params.jurisdiction,
            reporter: params.reporter,
            report_date: params.report_date.to_string(),
            compressed: params.compressed,
            jobs,
        })
    }

    /// Same as [`handle`](Self::handle) for a raw message body.
    pub async fn handle_body(&self, body: &str) -> Result<PipelineRun, PipelineError> {
        let notification: Value =
            serde_json::from_str(body).map_err(|e| PipelineError::MalformedEvent(e.to_string()))?;
        self.handle(&notification).await
    }
}
