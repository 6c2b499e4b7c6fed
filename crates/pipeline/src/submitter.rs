//! Submits a built DAG to the batch backend, stage by stage.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use votefile_core::config::BatchConfig;

use crate::catalog::StageKind;
use crate::dag::PipelineDag;
use crate::error::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("AWS SDK error: {0}")]
    Sdk(String),

    #[error("backend returned no job id for {job_name}")]
    MissingJobId { job_name: String },
}

/// One job as the backend sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRequest {
    pub job_name: String,
    pub job_queue: String,
    pub job_definition: String,
    pub command: Vec<String>,
    /// Job ids returned by earlier submissions.
    pub depends_on: Vec<String>,
}

/// External execution service.
///
/// The backend holds a job until every job in `depends_on` has succeeded;
/// this crate never waits on completion.
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// Submit one job and return the id the backend assigned to it.
    async fn submit(&self, request: &JobRequest) -> Result<String, BatchError>;
}

/// Record of one successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedJob {
    pub stage: StageKind,
    pub job_name: String,
    pub job_id: String,
    pub depends_on: Vec<String>,
}

pub struct JobSubmitter {
    backend: Arc<dyn BatchBackend>,
    config: BatchConfig,
}

impl JobSubmitter {
    pub fn new(backend: Arc<dyn BatchBackend>, config: BatchConfig) -> Self {
        Self { backend, config }
    }

    pub fn job_definition(&self, kind: StageKind) -> &str {
        match kind {
            StageKind::Copy => &self.config.copy_job_definition,
            StageKind::Decompress => &self.config.decompress_job_definition,
            StageKind::Transform | StageKind::PrecinctLoad | StageKind::FinalLoad => {
                &self.config.etl_job_definition
            }
        }
    }

    /// Submit every stage in execution order, recording job ids on the DAG.
    ///
    /// Stops at the first failure. Stages submitted before it stay
    /// submitted and keep their job ids; the error names the failed stage
    /// and its index in the execution order.
    pub async fn submit(&self, dag: &mut PipelineDag) -> Result<Vec<SubmittedJob>, PipelineError> {
        let run_id = dag.run_id();
        let order = dag.execution_order().to_vec();
        let mut submitted = Vec::with_capacity(order.len());

        for (index, id) in order.into_iter().enumerate() {
            let stage = dag.node(id);
            if stage.job_id().is_some() {
                return Err(PipelineError::AlreadySubmitted { stage: stage.kind });
            }

            let depends_on = stage
                .predecessors
                .iter()
                .map(|p| {
                    let predecessor = dag.node(*p);
                    predecessor
                        .job_id()
                        .map(str::to_string)
                        .ok_or(PipelineError::UnresolvedDependency {
                            stage: stage.kind,
                            predecessor: predecessor.kind,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let request = JobRequest {
                job_name: stage.job_name.clone(),
                job_queue: self.config.job_queue.clone(),
                job_definition: self.job_definition(stage.kind).to_string(),
                command: stage.command.tokens().to_vec(),
                depends_on,
            };
            let kind = stage.kind;

            let job_id = match self.backend.submit(&request).await {
                Ok(job_id) => job_id,
                Err(source) => {
                    error!(
                        %run_id,
                        stage = %kind,
                        index,
                        error = %source,
                        "Job submission failed"
                    );
                    return Err(PipelineError::SubmissionFailed {
                        stage: kind,
                        index,
                        source,
                    });
                }
            };

            info!(
                %run_id,
                stage = %kind,
                job_name = %request.job_name,
                job_id = %job_id,
                depends_on = ?request.depends_on,
                "{} job is {}",
                kind,
                job_id
            );

            dag.assign_job_id(id, job_id.clone());
            submitted.push(SubmittedJob {
                stage: kind,
                job_name: request.job_name,
                job_id,
                depends_on: request.depends_on,
            });
        }

        Ok(submitted)
    }
}
