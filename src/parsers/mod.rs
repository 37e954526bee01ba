use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bugreport::Bugreport;
use crate::error::Result;
use crate::lines::{Line, Lines};

pub mod anr_parser;
pub mod bugreport_parser;
pub mod logcat_parser;
pub mod metadata_parser;
pub mod system_properties_parser;
pub mod thread_snapshot_parser;
pub mod vm_traces_parser;

pub use anr_parser::{Anr, AnrParser};
pub use bugreport_parser::BugreportParser;
pub use logcat_parser::{LogBuffer, LogLine, Logcat, LogcatParser};
pub use metadata_parser::MetadataParser;
pub use system_properties_parser::SystemPropertiesParser;
pub use thread_snapshot_parser::{ThreadSnapshot, ThreadSnapshotParser};
pub use vm_traces_parser::{ProcessSnapshot, VmTraces, VmTracesKind, VmTracesParser};

/// The begin marker of a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: String,
    pub command: Option<String>,
    /// Line number of the marker in the original input.
    pub lineno: usize,
}

impl SectionHeader {
    pub fn new(name: &str, command: Option<&str>, lineno: usize) -> Self {
        SectionHeader {
            name: name.to_string(),
            command: command.map(str::to_string),
            lineno,
        }
    }
}

/// What a section parser contributes to the report.
#[derive(Debug, Clone)]
pub enum SectionOutput {
    Logcat(Logcat),
    VmTraces { kind: VmTracesKind, traces: VmTraces },
    SystemProperties(BTreeMap<String, String>),
    Empty,
}

/// The core trait for all section parsers.
/// Any new section parser must implement this trait and list the section
/// names it handles; the driver routes bodies by exact name.
pub trait SectionParser: Send + Sync {
    fn handled_section_names(&self) -> &[&'static str];

    /// Parses the body of one section, marker lines excluded. `report` is the
    /// report built so far.
    fn parse(&self, header: &SectionHeader, lines: Lines<'_, Line>, report: &Bugreport) -> Result<SectionOutput>;
}

/// Enum to represent the available section parsers for command-line selection.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum ParserType {
    Logcat,
    VmTraces,
    SystemProperties,
}

impl ParserType {
    pub fn all() -> Vec<ParserType> {
        vec![ParserType::Logcat, ParserType::VmTraces, ParserType::SystemProperties]
    }

    pub fn create(self) -> Box<dyn SectionParser> {
        match self {
            ParserType::Logcat => Box::new(LogcatParser::new()),
            ParserType::VmTraces => Box::new(VmTracesParser::new()),
            ParserType::SystemProperties => Box::new(SystemPropertiesParser::new()),
        }
    }
}
