//! Turns voter-file upload notifications into dependent batch jobs.
//!
//! A notification is interpreted into [`PipelineParameters`], expanded into a
//! [`PipelineDag`] from the stage [`catalog`], and submitted stage by stage so
//! that every job carries the ids of the jobs it waits on.

pub mod aws;
pub mod batch;
pub mod catalog;
pub mod dag;
pub mod driver;
pub mod error;
pub mod event;
pub mod submitter;
pub mod tags;

pub use batch::{AwsBatchBackend, DryRunBackend};
pub use catalog::{Command, StageKind, WorkLayout, CATALOG};
pub use dag::{DagBuilder, PipelineDag, StageId, StageInstance};
pub use driver::{Orchestrator, PipelineRun};
pub use error::PipelineError;
pub use event::{EventInterpreter, PipelineParameters, ReportDate, StorageEvent};
pub use submitter::{BatchBackend, BatchError, JobRequest, JobSubmitter, SubmittedJob};
pub use tags::{S3TagLookup, StaticTagLookup, TagError, TagLookup};
