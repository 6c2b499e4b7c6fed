//! Integration tests for votefile-pipeline.
//!
//! Every test runs against in-memory tag and batch backends; no AWS
//! credentials are needed.

mod scenarios;
mod submission;
mod support;
