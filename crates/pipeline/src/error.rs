use thiserror::Error;

use crate::catalog::StageKind;
use crate::submitter::BatchError;
use crate::tags::TagError;

/// Everything that can stop a pipeline invocation.
///
/// Nothing here is recovered inside the crate; the hosting runtime decides
/// what to do with it (see [`PipelineError::is_retriable`]).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("malformed storage event: {0}")]
    MalformedEvent(String),

    #[error("bucket '{bucket}' has no jurisdiction tag")]
    UnknownJurisdiction { bucket: String },

    #[error("no reporter key configured for jurisdiction {jurisdiction}")]
    UnknownReporter { jurisdiction: String },

    #[error("can't determine file date from {key}")]
    UnparseableDate { key: String },

    #[error("tag lookup for bucket '{bucket}' failed: {source}")]
    TagLookup {
        bucket: String,
        #[source]
        source: TagError,
    },

    #[error("invalid stage catalog: {0}")]
    InvalidCatalog(String),

    #[error("cycle detected among stages: {0}")]
    CycleDetected(String),

    #[error("stage {stage} was already submitted")]
    AlreadySubmitted { stage: StageKind },

    #[error("stage {stage} depends on {predecessor}, which has no job id yet")]
    UnresolvedDependency {
        stage: StageKind,
        predecessor: StageKind,
    },

    #[error("submission of stage {stage} failed at index {index}: {source}")]
    SubmissionFailed {
        stage: StageKind,
        index: usize,
        #[source]
        source: BatchError,
    },
}

impl PipelineError {
    /// Transient backend or service failures. Re-running the same event may
    /// succeed; every other variant needs a corrected event or catalog.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::SubmissionFailed { .. } | PipelineError::TagLookup { .. }
        )
    }
}
