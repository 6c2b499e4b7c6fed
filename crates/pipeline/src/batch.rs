//! [`BatchBackend`] implementations: AWS Batch and a dry-run logger.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use aws_sdk_batch::operation::submit_job::SubmitJobOutput;
use aws_sdk_batch::types::{ContainerOverrides, JobDependency};
use aws_types::SdkConfig;
use tracing::{debug, info};

use crate::submitter::{BatchBackend, BatchError, JobRequest};

/// Submits jobs with AWS Batch `SubmitJob`.
pub struct AwsBatchBackend {
    client: aws_sdk_batch::Client,
}

impl AwsBatchBackend {
    pub fn new(sdk: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_batch::Client::new(sdk),
        }
    }
}

#[async_trait]
impl BatchBackend for AwsBatchBackend {
    async fn submit(&self, request: &JobRequest) -> Result<String, BatchError> {
        let overrides = ContainerOverrides::builder()
            .set_command(Some(request.command.clone()))
            .build();

        let depends_on: Vec<JobDependency> = request
            .depends_on
            .iter()
            .map(|job_id| JobDependency::builder().job_id(job_id).build())
            .collect();

        debug!(
            job_name = %request.job_name,
            job_queue = %request.job_queue,
            job_definition = %request.job_definition,
            "Submitting job"
        );

        let resp = self
            .client
            .submit_job()
            .job_name(&request.job_name)
            .job_queue(&request.job_queue)
            .job_definition(&request.job_definition)
            .container_overrides(overrides)
            .set_depends_on(Some(depends_on))
            .send()
            .await
            .map_err(|e| BatchError::Sdk(format!("SubmitJob failed: {e:?}")))?;

        job_id_from(&resp, &request.job_name)
    }
}

/// The id Batch assigned, or `MissingJobId` when the response has none.
fn job_id_from(output: &SubmitJobOutput, job_name: &str) -> Result<String, BatchError> {
    output
        .job_id()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BatchError::MissingJobId {
            job_name: job_name.to_string(),
        })
}

/// Logs each request and hands back `dry-run-N` ids. Nothing is submitted.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    next: AtomicUsize,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchBackend for DryRunBackend {
    async fn submit(&self, request: &JobRequest) -> Result<String, BatchError> {
        let job_id = format!("dry-run-{}", self.next.fetch_add(1, Ordering::SeqCst));
        info!(
            job_id = %job_id,
            job_name = %request.job_name,
            job_queue = %request.job_queue,
            job_definition = %request.job_definition,
            command = %request.command.join(" "),
            depends_on = ?request.depends_on,
            "Dry run: job not submitted"
        );
        Ok(job_id)
    }
}
