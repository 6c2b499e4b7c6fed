//! Static description of the pipeline stages.
//!
//! Each row of [`CATALOG`] says when a stage applies, which stages it waits
//! for, and where it reads its input from. The stage kind itself knows how
//! to name its job, render its command, and where its output lands.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use votefile_core::config::PipelineConfig;

use crate::event::{PipelineParameters, COMPRESSED_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Copy,
    Decompress,
    Transform,
    PrecinctLoad,
    FinalLoad,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Copy => "copy",
            StageKind::Decompress => "decompress",
            StageKind::Transform => "transform",
            StageKind::PrecinctLoad => "precinct-load",
            StageKind::FinalLoad => "final-load",
        }
    }

    /// Backend-visible job name.
    pub fn job_name(&self, params: &PipelineParameters) -> String {
        match self {
            StageKind::Copy => "CopyVoterFile".to_string(),
            StageKind::Decompress => "UnzipVoterFile".to_string(),
            StageKind::Transform => format!("Transform{}", params.jurisdiction),
            StageKind::PrecinctLoad => {
                format!("LoadPrecincts{}{}", params.jurisdiction, params.report_date)
            }
            StageKind::FinalLoad => {
                format!("LoadVoterFile{}{}", params.jurisdiction, params.report_date)
            }
        }
    }

    /// Path this stage leaves on the work mount for later stages, if any.
    pub fn output_path(
        &self,
        params: &PipelineParameters,
        input: &str,
        layout: &WorkLayout,
    ) -> Option<String> {
        match self {
            StageKind::Copy => Some(layout.work_path(&params.source_key)),
            StageKind::Decompress => Some(
                input
                    .strip_suffix(COMPRESSED_SUFFIX)
                    .unwrap_or(input)
                    .to_string(),
            ),
            StageKind::Transform => Some(layout.work_path(&format!(
                "{}_output.csv",
                params.jurisdiction.to_lowercase()
            ))),
            StageKind::PrecinctLoad | StageKind::FinalLoad => None,
        }
    }

    /// Command tokens handed to the backend container.
    pub fn command(&self, params: &PipelineParameters, input: &str, layout: &WorkLayout) -> Command {
        match self {
            StageKind::Copy => {
                let local = layout.work_path(&params.source_key);
                let target = shell_quote(&local);
                Command::shell(format!(
                    "aws s3 cp {} {target}; chmod go+rw {target}",
                    shell_quote(input)
                ))
            }
            StageKind::Decompress => Command::shell(format!("gunzip -f {}", shell_quote(input))),
            StageKind::Transform => Command::etl(layout)
                .arg("-s")
                .arg(&params.jurisdiction)
                .arg("--input_file")
                .arg(input)
                .arg("transform"),
            StageKind::PrecinctLoad => Command::etl(layout)
                .arg("--update_jndi")
                .arg("--report_date")
                .arg(params.report_date.to_string())
                .arg("-s")
                .arg(&params.jurisdiction)
                .arg("--input_file")
                .arg(input)
                .arg("precincts"),
            StageKind::FinalLoad => Command::etl(layout)
                .arg("--update_jndi")
                .arg("--report_date")
                .arg(params.report_date.to_string())
                .arg("--reporter_key")
                .arg(params.reporter.to_string())
                .arg("-s")
                .arg(&params.jurisdiction)
                .arg("--input_file")
                .arg(input)
                .arg("load"),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Single-quote `word` for `sh` unless it is made only of characters the
/// shell leaves alone.
fn shell_quote(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// Ordered command tokens for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command(Vec<String>);

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, token: impl Into<String>) -> Self {
        self.0.push(token.into());
        self
    }

    /// `sh -cxv <script>`: trace every line the shell runs.
    fn shell(script: String) -> Self {
        Self::new().arg("sh").arg("-cxv").arg(script)
    }

    /// Prefix shared by every ETL stage.
    fn etl(layout: &WorkLayout) -> Self {
        Self::new().arg("--configfile").arg(&layout.etl_config)
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Where stages read and write on the shared work mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    pub work_dir: String,
    pub etl_config: String,
}

impl WorkLayout {
    pub fn work_path(&self, relative: &str) -> String {
        format!("{}/{}", self.work_dir.trim_end_matches('/'), relative)
    }
}

impl From<&PipelineConfig> for WorkLayout {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            etl_config: config.etl_config.clone(),
        }
    }
}

impl Default for WorkLayout {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// When a catalog row is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    /// Only when the source object is compressed.
    Compressed,
}

impl Condition {
    pub fn applies(&self, params: &PipelineParameters) -> bool {
        match self {
            Condition::Always => true,
            Condition::Compressed => params.compressed,
        }
    }
}

/// A reference from one catalog row to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Stage(StageKind),
    /// Last instantiated stage of the linear prefix (copy, then decompress
    /// when present) at the point this row is reached.
    ChainHead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// The object that triggered the run (`s3://bucket/key`).
    SourceObject,
    OutputOf(Upstream),
}

#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub kind: StageKind,
    pub condition: Condition,
    /// Instantiating this row advances the chain head.
    pub extends_chain: bool,
    pub predecessors: &'static [Upstream],
    pub input: InputSource,
}

pub static CATALOG: [StageSpec; 5] = [
    StageSpec {
        kind: StageKind::Copy,
        condition: Condition::Always,
        extends_chain: true,
        predecessors: &[],
        input: InputSource::SourceObject,
    },
    StageSpec {
        kind: StageKind::Decompress,
        condition: Condition::Compressed,
        extends_chain: true,
        predecessors: &[Upstream::Stage(StageKind::Copy)],
        input: InputSource::OutputOf(Upstream::Stage(StageKind::Copy)),
    },
    StageSpec {
        kind: StageKind::Transform,
        condition: Condition::Always,
        extends_chain: false,
        predecessors: &[Upstream::ChainHead],
        input: InputSource::OutputOf(Upstream::ChainHead),
    },
    StageSpec {
        kind: StageKind::PrecinctLoad,
        condition: Condition::Always,
        extends_chain: false,
        predecessors: &[Upstream::ChainHead],
        input: InputSource::OutputOf(Upstream::ChainHead),
    },
    StageSpec {
        kind: StageKind::FinalLoad,
        condition: Condition::Always,
        extends_chain: false,
        predecessors: &[
            Upstream::Stage(StageKind::Transform),
            Upstream::Stage(StageKind::PrecinctLoad),
        ],
        input: InputSource::OutputOf(Upstream::Stage(StageKind::Transform)),
    },
];
