use std::sync::Arc;

use votefile_pipeline::{
    DagBuilder, JobSubmitter, PipelineError, PipelineParameters, ReportDate, StageKind, WorkLayout,
};
use votefile_core::BatchConfig;

use crate::support::{orchestrator, s3_event, tagged, RecordingBackend};

fn params(key: &str) -> PipelineParameters {
    PipelineParameters {
        bucket: "fl-drop".into(),
        source_key: key.into(),
        jurisdiction: "FL".into(),
        reporter: 4,
        report_date: ReportDate::new("2021", "06", "30"),
        compressed: key.ends_with(".gz"),
    }
}

#[tokio::test]
async fn every_job_waits_on_its_predecessors() {
    let backend = Arc::new(RecordingBackend::default());
    let submitter = JobSubmitter::new(backend.clone(), BatchConfig::default());
    let mut dag = DagBuilder::new(WorkLayout::default())
        .build(&params("FL_20210630.zip.gz"))
        .unwrap();

    let jobs = submitter.submit(&mut dag).await.unwrap();

    for stage in dag.ordered_stages() {
        let job = jobs.iter().find(|j| j.stage == stage.kind).unwrap();
        let expected: Vec<String> = stage
            .predecessors
            .iter()
            .map(|p| dag.stage(*p).and_then(|s| s.job_id()).unwrap().to_string())
            .collect();
        assert_eq!(job.depends_on, expected, "{}", stage.kind);
        assert_eq!(stage.job_id(), Some(job.job_id.as_str()));
    }
}

#[tokio::test]
async fn partial_failure_keeps_earlier_submissions() {
    let backend = Arc::new(RecordingBackend::failing_at(3));
    let event = s3_event("wa-drop", "WA_VRDB_20191231.txt.gz");

    let err = orchestrator(tagged("wa-drop", "WA"), backend.clone())
        .handle(&event)
        .await
        .unwrap_err();

    match &err {
        PipelineError::SubmissionFailed { stage, index, .. } => {
            assert_eq!(*stage, StageKind::PrecinctLoad);
            assert_eq!(*index, 3);
        }
        other => panic!("expected SubmissionFailed, got {other:?}"),
    }
    assert!(err.is_retriable());
    assert_eq!(
        backend.job_names(),
        vec!["CopyVoterFile", "UnzipVoterFile", "TransformWA"]
    );
}

#[tokio::test]
async fn each_build_gets_a_fresh_run_id() {
    let builder = DagBuilder::new(WorkLayout::default());
    let first = builder.build(&params("FL_20210630.csv")).unwrap();
    let second = builder.build(&params("FL_20210630.csv")).unwrap();

    assert_ne!(first.run_id(), second.run_id());
    assert_eq!(first.kinds(), second.kinds());
}
