//! Turns a storage notification into [`PipelineParameters`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use votefile_core::config::ReporterTable;

use crate::error::PipelineError;
use crate::tags::TagLookup;

/// Keys ending in this suffix get a decompress stage.
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// `_YYYYMMDD` anywhere after an underscore; first match wins.
fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_([0-9]{4})([0-9]{2})([0-9]{2})").expect("valid date pattern"))
}

// ── Notification shape ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "Records", default)]
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: BucketRef,
    object: ObjectRef,
}

#[derive(Debug, Deserialize)]
struct BucketRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectRef {
    key: String,
}

/// The object a notification is about, key already decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageEvent {
    pub bucket: String,
    pub key: String,
}

impl StorageEvent {
    /// Take the first record of an S3 notification.
    ///
    /// Notifications carry one record in practice; any extra ones are
    /// logged and not processed.
    pub fn from_notification(notification: &Value) -> Result<Self, PipelineError> {
        let parsed = Notification::deserialize(notification)
            .map_err(|e| PipelineError::MalformedEvent(e.to_string()))?;

        let mut records = parsed.records.into_iter();
        let first = records
            .next()
            .ok_or_else(|| PipelineError::MalformedEvent("notification has no records".into()))?;

        let ignored = records.count();
        if ignored > 0 {
            warn!(ignored, "Notification carries extra records, only the first is processed");
        }

        if first.s3.bucket.name.is_empty() {
            return Err(PipelineError::MalformedEvent("empty bucket name".into()));
        }

        let key = decode_key(&first.s3.object.key)?;
        if key.is_empty() {
            return Err(PipelineError::MalformedEvent("empty object key".into()));
        }

        Ok(Self {
            bucket: first.s3.bucket.name,
            key,
        })
    }

    /// Parse a raw notification body.
    pub fn from_json(body: &str) -> Result<Self, PipelineError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| PipelineError::MalformedEvent(format!("invalid JSON: {e}")))?;
        Self::from_notification(&value)
    }
}

/// Decode an object key the way S3 encodes it in notifications:
/// `+` is a space, everything else is percent-encoded UTF-8.
pub fn decode_key(raw: &str) -> Result<String, PipelineError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| PipelineError::MalformedEvent(format!("object key is not UTF-8: {e}")))
}

// ── Parameters ────────────────────────────────────────────────

/// Report date digits exactly as they appear in the file name.
///
/// Not validated as a calendar date: `_20201399` gives `2020-13-99`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDate {
    year: String,
    month: String,
    day: String,
}

impl ReportDate {
    pub fn new(year: &str, month: &str, day: &str) -> Self {
        Self {
            year: year.to_string(),
            month: month.to_string(),
            day: day.to_string(),
        }
    }

    /// First `_YYYYMMDD` in `key`, if any.
    pub fn from_key(key: &str) -> Option<Self> {
        let caps = date_pattern().captures(key)?;
        Some(Self::new(&caps[1], &caps[2], &caps[3]))
    }
}

impl fmt::Display for ReportDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.year, self.month, self.day)
    }
}

/// Everything the rest of the pipeline needs to know about one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineParameters {
    pub bucket: String,
    /// Decoded object key.
    pub source_key: String,
    pub jurisdiction: String,
    pub reporter: u32,
    pub report_date: ReportDate,
    pub compressed: bool,
}

impl PipelineParameters {
    pub fn source_uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.source_key)
    }
}

// ── Interpreter ───────────────────────────────────────────────

pub struct EventInterpreter {
    tags: Arc<dyn TagLookup>,
    reporters: ReporterTable,
    jurisdiction_tag: String,
}

impl EventInterpreter {
    pub fn new(tags: Arc<dyn TagLookup>, reporters: ReporterTable, jurisdiction_tag: &str) -> Self {
        Self {
            tags,
            reporters,
            jurisdiction_tag: jurisdiction_tag.to_string(),
        }
    }

    /// Interpret a raw notification.
    pub async fn interpret(&self, notification: &Value) -> Result<PipelineParameters, PipelineError> {
        let event = StorageEvent::from_notification(notification)?;
        self.interpret_event(&event).await
    }

    /// Resolve jurisdiction, reporter, date and compression for one object.
    pub async fn interpret_event(
        &self,
        event: &StorageEvent,
    ) -> Result<PipelineParameters, PipelineError> {
        let tags = self
            .tags
            .bucket_tags(&event.bucket)
            .await
            .map_err(|source| PipelineError::TagLookup {
                bucket: event.bucket.clone(),
                source,
            })?;

        let jurisdiction = tags
            .get(&self.jurisdiction_tag)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownJurisdiction {
                bucket: event.bucket.clone(),
            })?;

        let reporter = self
            .reporters
            .get(&jurisdiction)
            .ok_or_else(|| PipelineError::UnknownReporter {
                jurisdiction: jurisdiction.clone(),
            })?;

        let report_date =
            ReportDate::from_key(&event.key).ok_or_else(|| PipelineError::UnparseableDate {
                key: event.key.clone(),
            })?;

        info!(
            bucket = %event.bucket,
            key = %event.key,
            "Processing file for {} on {}",
            jurisdiction,
            report_date
        );

        Ok(PipelineParameters {
            bucket: event.bucket.clone(),
            source_key: event.key.clone(),
            jurisdiction,
            reporter,
            report_date,
            compressed: event.key.ends_with(COMPRESSED_SUFFIX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::tags::StaticTagLookup;

    fn notification(bucket: &str, key: &str) -> Value {
        json!({
            "Records": [{
                "eventSource": "aws:s3",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": bucket, "arn": format!("arn:aws:s3:::{bucket}") },
                    "object": { "key": key, "size": 1024 }
                }
            }]
        })
    }

    fn interpreter(tags: StaticTagLookup) -> EventInterpreter {
        EventInterpreter::new(Arc::new(tags), ReporterTable::default(), "state_name")
    }

    #[test]
    fn decodes_plus_and_percent_escapes() {
        assert_eq!(decode_key("OH+votefile_20200101.csv").unwrap(), "OH votefile_20200101.csv");
        assert_eq!(decode_key("dir%2FOH_20200101%2B1.csv").unwrap(), "dir/OH_20200101+1.csv");
        assert_eq!(decode_key("caf%C3%A9_20200101.csv").unwrap(), "café_20200101.csv");
    }

    #[test]
    fn invalid_utf8_key_is_malformed() {
        assert!(matches!(
            decode_key("bad%FF_20200101.csv"),
            Err(PipelineError::MalformedEvent(_))
        ));
    }

    #[test]
    fn event_from_notification() {
        let event =
            StorageEvent::from_notification(&notification("voter-drop", "uploads/WA+file_20191231.csv.gz"))
                .unwrap();
        assert_eq!(event.bucket, "voter-drop");
        assert_eq!(event.key, "uploads/WA file_20191231.csv.gz");
    }

    #[test]
    fn notification_without_records_is_malformed() {
        let test_event = json!({"Service": "Amazon S3", "Event": "s3:TestEvent"});
        assert!(matches!(
            StorageEvent::from_notification(&test_event),
            Err(PipelineError::MalformedEvent(_))
        ));

        let missing_key = json!({"Records": [{"s3": {"bucket": {"name": "b"}, "object": {}}}]});
        assert!(matches!(
            StorageEvent::from_notification(&missing_key),
            Err(PipelineError::MalformedEvent(_))
        ));

        assert!(matches!(
            StorageEvent::from_json("not json"),
            Err(PipelineError::MalformedEvent(_))
        ));
    }

    #[test]
    fn extra_records_are_ignored() {
        let mut value = notification("b", "first_20200101.csv");
        let second = notification("b", "second_20200202.csv")["Records"][0].clone();
        value["Records"].as_array_mut().unwrap().push(second);

        let event = StorageEvent::from_notification(&value).unwrap();
        assert_eq!(event.key, "first_20200101.csv");
    }

    #[test]
    fn report_date_first_match_wins() {
        let date = ReportDate::from_key("OH_20200101_20210202.csv").unwrap();
        assert_eq!(date.to_string(), "2020-01-01");
    }

    #[test]
    fn report_date_is_not_calendar_checked() {
        let date = ReportDate::from_key("OH_20201399.csv").unwrap();
        assert_eq!(date.to_string(), "2020-13-99");
    }

    #[test]
    fn report_date_needs_underscore_and_eight_digits() {
        assert!(ReportDate::from_key("randomfile.csv").is_none());
        assert!(ReportDate::from_key("OH20200101.csv").is_none());
        assert!(ReportDate::from_key("OH_2020011.csv").is_none());
        // Trailing characters after the digits are fine.
        assert!(ReportDate::from_key("OH_202001019999.csv").is_some());
    }

    #[tokio::test]
    async fn interprets_uncompressed_file() {
        let interp = interpreter(StaticTagLookup::any_bucket("state_name", "OH"));
        let params = interp
            .interpret(&notification("voter-drop", "OH_votefile_20200101.csv"))
            .await
            .unwrap();

        assert_eq!(params.jurisdiction, "OH");
        assert_eq!(params.reporter, 2);
        assert_eq!(params.report_date.to_string(), "2020-01-01");
        assert!(!params.compressed);
        assert_eq!(params.source_uri(), "s3://voter-drop/OH_votefile_20200101.csv");
    }

    #[tokio::test]
    async fn compression_follows_suffix() {
        let interp = interpreter(StaticTagLookup::any_bucket("state_name", "WA"));
        let params = interp
            .interpret(&notification("b", "WA_votefile_20191231.csv.gz"))
            .await
            .unwrap();
        assert!(params.compressed);
        assert_eq!(params.reporter, 1);

        let params = interp
            .interpret(&notification("b", "WA_votefile_20191231.tgz"))
            .await
            .unwrap();
        assert!(!params.compressed);
    }

    #[tokio::test]
    async fn missing_tag_is_unknown_jurisdiction() {
        let interp = interpreter(StaticTagLookup::any_bucket("owner", "elections"));
        let err = interp
            .interpret(&notification("untagged", "OH_votefile_20200101.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownJurisdiction { bucket } if bucket == "untagged"));
    }

    #[tokio::test]
    async fn unmapped_jurisdiction_is_unknown_reporter() {
        let interp = interpreter(StaticTagLookup::any_bucket("state_name", "TX"));
        let err = interp
            .interpret(&notification("b", "TX_votefile_20200101.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownReporter { jurisdiction } if jurisdiction == "TX"));
    }

    #[tokio::test]
    async fn injected_reporter_table_is_used() {
        let table = ReporterTable::new([("TX".to_string(), 42)]);
        let interp = EventInterpreter::new(
            Arc::new(StaticTagLookup::any_bucket("jurisdiction", "TX")),
            table,
            "jurisdiction",
        );
        let params = interp
            .interpret(&notification("b", "TX_votefile_20200101.csv"))
            .await
            .unwrap();
        assert_eq!(params.reporter, 42);
    }

    #[tokio::test]
    async fn undated_key_is_unparseable() {
        let interp = interpreter(StaticTagLookup::any_bucket("state_name", "OH"));
        let err = interp
            .interpret(&notification("b", "randomfile.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnparseableDate { key } if key == "randomfile.csv"));
    }
}
