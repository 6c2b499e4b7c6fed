use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use votefile_core::Config;
use votefile_pipeline::{
    BatchBackend, BatchError, JobRequest, Orchestrator, StaticTagLookup, TagError, TagLookup,
};

/// S3 `ObjectCreated` notification for one object.
pub fn s3_event(bucket: &str, key: &str) -> Value {
    json!({
        "Records": [{
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "awsRegion": "us-east-1",
            "eventName": "ObjectCreated:Put",
            "s3": {
                "s3SchemaVersion": "1.0",
                "bucket": { "name": bucket, "arn": format!("arn:aws:s3:::{bucket}") },
                "object": { "key": key, "size": 52_428_800 }
            }
        }]
    })
}

/// The token following `--input_file` in an ETL command.
pub fn input_file(command: &[String]) -> Option<&str> {
    command
        .iter()
        .position(|token| token == "--input_file")
        .and_then(|i| command.get(i + 1))
        .map(String::as_str)
}

pub fn tagged(bucket: &str, jurisdiction: &str) -> StaticTagLookup {
    StaticTagLookup::default().with_bucket(bucket, "state_name", jurisdiction)
}

/// Backend that records requests and checks each dependency was issued
/// before the job that waits on it.
#[derive(Default)]
pub struct RecordingBackend {
    pub requests: Mutex<Vec<JobRequest>>,
    issued: Mutex<HashSet<String>>,
    fail_at: Option<usize>,
}

impl RecordingBackend {
    /// Fail the submission at `index` (zero-based) in execution order.
    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            ..Default::default()
        }
    }

    pub fn job_names(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.job_name.clone())
            .collect()
    }
}

#[async_trait]
impl BatchBackend for RecordingBackend {
    async fn submit(&self, request: &JobRequest) -> Result<String, BatchError> {
        let mut requests = self.requests.lock().unwrap();
        if self.fail_at == Some(requests.len()) {
            return Err(BatchError::Sdk("service unavailable".into()));
        }

        let mut issued = self.issued.lock().unwrap();
        for dep in &request.depends_on {
            assert!(issued.contains(dep), "{} depends on unknown job {dep}", request.job_name);
        }

        let job_id = format!("job-{}", requests.len() + 1);
        issued.insert(job_id.clone());
        requests.push(request.clone());
        Ok(job_id)
    }
}

/// Tag lookup whose backing service is down.
pub struct UnavailableTags;

#[async_trait]
impl TagLookup for UnavailableTags {
    async fn bucket_tags(&self, _bucket: &str) -> Result<HashMap<String, String>, TagError> {
        Err(TagError::Sdk("connection reset".into()))
    }
}

/// Orchestrator on built-in defaults: `/work`, reporters WA=1 OH=2 NY=3 FL=4 MI=5.
pub fn orchestrator(tags: impl TagLookup + 'static, backend: Arc<RecordingBackend>) -> Orchestrator {
    let config = Config::for_profile("PIPELINE_IT");
    Orchestrator::from_config(&config, Arc::new(tags), backend)
}
