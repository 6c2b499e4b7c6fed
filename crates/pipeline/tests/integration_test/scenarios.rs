use std::sync::Arc;

use votefile_pipeline::{PipelineError, StageKind, StaticTagLookup};

use crate::support::{input_file, orchestrator, s3_event, tagged, RecordingBackend, UnavailableTags};

#[tokio::test]
async fn plain_file_runs_four_stages() {
    let backend = Arc::new(RecordingBackend::default());
    let event = s3_event("oh-drop", "OH_voterfile_20200101.csv");

    let run = orchestrator(tagged("oh-drop", "OH"), backend.clone())
        .handle(&event)
        .await
        .unwrap();

    assert_eq!(run.jurisdiction, "OH");
    assert_eq!(run.reporter, 2);
    assert_eq!(run.report_date, "2020-01-01");
    assert!(!run.compressed);

    let stages: Vec<StageKind> = run.jobs.iter().map(|j| j.stage).collect();
    assert_eq!(
        stages,
        vec![
            StageKind::Copy,
            StageKind::Transform,
            StageKind::PrecinctLoad,
            StageKind::FinalLoad,
        ]
    );
    assert_eq!(
        backend.job_names(),
        vec![
            "CopyVoterFile",
            "TransformOH",
            "LoadPrecinctsOH2020-01-01",
            "LoadVoterFileOH2020-01-01",
        ]
    );

    let requests = backend.requests.lock().unwrap();
    assert_eq!(
        requests[0].command,
        vec![
            "sh",
            "-cxv",
            "aws s3 cp s3://oh-drop/OH_voterfile_20200101.csv /work/OH_voterfile_20200101.csv; \
             chmod go+rw /work/OH_voterfile_20200101.csv",
        ]
    );
    assert_eq!(
        requests[1].command,
        vec![
            "--configfile",
            "/work/load_conf.json",
            "-s",
            "OH",
            "--input_file",
            "/work/OH_voterfile_20200101.csv",
            "transform",
        ]
    );
    assert_eq!(
        requests[3].command,
        vec![
            "--configfile",
            "/work/load_conf.json",
            "--update_jndi",
            "--report_date",
            "2020-01-01",
            "--reporter_key",
            "2",
            "-s",
            "OH",
            "--input_file",
            "/work/oh_output.csv",
            "load",
        ]
    );
    assert_eq!(requests[3].depends_on, vec!["job-2", "job-3"]);
}

#[tokio::test]
async fn compressed_file_gets_decompress_stage() {
    let backend = Arc::new(RecordingBackend::default());
    let event = s3_event("wa-drop", "WA_VRDB_20191231.txt.gz");

    let run = orchestrator(tagged("wa-drop", "WA"), backend.clone())
        .handle(&event)
        .await
        .unwrap();

    assert!(run.compressed);
    assert_eq!(run.reporter, 1);
    assert_eq!(run.report_date, "2019-12-31");
    assert_eq!(run.jobs.len(), 5);
    assert_eq!(run.jobs[1].stage, StageKind::Decompress);
    assert_eq!(run.jobs[1].job_name, "UnzipVoterFile");

    let requests = backend.requests.lock().unwrap();
    assert_eq!(requests[1].command[2], "gunzip -f /work/WA_VRDB_20191231.txt.gz");
    assert_eq!(requests[1].job_definition, "BusyBox");
    // Transform and precinct load both read the decompressed file.
    assert_eq!(requests[2].job_name, "TransformWA");
    assert_eq!(input_file(&requests[2].command), Some("/work/WA_VRDB_20191231.txt"));
    assert_eq!(requests[3].job_name, "LoadPrecinctsWA2019-12-31");
    assert_eq!(input_file(&requests[3].command), Some("/work/WA_VRDB_20191231.txt"));
    assert_eq!(input_file(&requests[4].command), Some("/work/wa_output.csv"));
    assert_eq!(requests[2].depends_on, vec!["job-2"]);
    assert_eq!(requests[3].depends_on, vec!["job-2"]);
}

#[tokio::test]
async fn file_without_date_submits_nothing() {
    let backend = Arc::new(RecordingBackend::default());
    let event = s3_event("oh-drop", "randomfile.csv");

    let err = orchestrator(tagged("oh-drop", "OH"), backend.clone())
        .handle(&event)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::UnparseableDate { ref key } if key == "randomfile.csv"));
    assert!(!err.is_retriable());
    assert!(backend.job_names().is_empty());
}

#[tokio::test]
async fn untagged_bucket_is_unknown_jurisdiction() {
    let backend = Arc::new(RecordingBackend::default());
    let event = s3_event("mystery-bucket", "OH_voterfile_20200101.csv");

    let err = orchestrator(StaticTagLookup::default(), backend.clone())
        .handle(&event)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::UnknownJurisdiction { ref bucket } if bucket == "mystery-bucket"));
    assert!(backend.job_names().is_empty());
}

#[tokio::test]
async fn jurisdiction_without_reporter_is_rejected() {
    let backend = Arc::new(RecordingBackend::default());
    let event = s3_event("tx-drop", "TX_voters_20200101.csv");

    let err = orchestrator(tagged("tx-drop", "TX"), backend.clone())
        .handle(&event)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::UnknownReporter { ref jurisdiction } if jurisdiction == "TX"));
    assert!(backend.job_names().is_empty());
}

#[tokio::test]
async fn encoded_key_is_decoded_before_use() {
    let backend = Arc::new(RecordingBackend::default());
    let event = s3_event("ny-drop", "uploads/NY+Voters%2Bextra_20200202.csv");

    let run = orchestrator(tagged("ny-drop", "NY"), backend.clone())
        .handle(&event)
        .await
        .unwrap();

    assert_eq!(run.key, "uploads/NY Voters+extra_20200202.csv");
    assert_eq!(run.report_date, "2020-02-02");
    let requests = backend.requests.lock().unwrap();
    assert_eq!(
        requests[0].command[2],
        "aws s3 cp 's3://ny-drop/uploads/NY Voters+extra_20200202.csv' \
         '/work/uploads/NY Voters+extra_20200202.csv'; \
         chmod go+rw '/work/uploads/NY Voters+extra_20200202.csv'"
    );
    // Every later stage reads the file where the copy put it.
    assert_eq!(
        input_file(&requests[1].command),
        Some("/work/uploads/NY Voters+extra_20200202.csv")
    );
}

#[tokio::test]
async fn tag_service_outage_is_retriable() {
    let backend = Arc::new(RecordingBackend::default());
    let event = s3_event("oh-drop", "OH_voterfile_20200101.csv");

    let err = orchestrator(UnavailableTags, backend.clone())
        .handle(&event)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::TagLookup { .. }));
    assert!(err.is_retriable());
    assert!(backend.job_names().is_empty());
}

#[tokio::test]
async fn notification_without_records_is_malformed() {
    let backend = Arc::new(RecordingBackend::default());
    let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"oh-drop"}"#;

    let err = orchestrator(tagged("oh-drop", "OH"), backend.clone())
        .handle_body(body)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::MalformedEvent(_)));
    assert!(!err.is_retriable());
}
