use chrono::{Datelike, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::parsers::anr_parser::Anr;
use crate::parsers::logcat_parser::{LogLine, Logcat};
use crate::parsers::vm_traces_parser::VmTraces;

// ============================================================================
// PROCESS REGISTRY
// ============================================================================

/// Canonical record for a process seen anywhere in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cmd_line: String,
    pub threads: BTreeMap<u32, ThreadInfo>,
}

impl ProcessInfo {
    pub fn new(pid: u32, cmd_line: &str) -> Self {
        ProcessInfo {
            pid,
            cmd_line: cmd_line.to_string(),
            threads: BTreeMap::new(),
        }
    }
}

/// A thread of a known process. `pid` is the key of the owning [`ProcessInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub pid: u32,
    pub tid: u32,
    pub name: String,
}

// ============================================================================
// SECTIONS
// ============================================================================

/// A section seen while splitting the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Line number of the begin marker in the original input.
    pub begin_lineno: usize,
    /// Body line range in the input, marker lines excluded, end exclusive.
    pub body_start: usize,
    pub body_end: usize,
    /// `None` when the section was closed without its end marker.
    pub duration_ms: Option<i64>,
    /// Whether a registered parser consumed the body.
    pub handled: bool,
}

// ============================================================================
// BUGREPORT
// ============================================================================

/// The structured model of one bugreport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Bugreport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    /// Every `Key: Value` line of the preamble.
    pub header: BTreeMap<String, String>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anr: Option<Anr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monkey_anr: Option<Anr>,
    /// System and event logs merged by time.
    pub logcat: Option<Logcat>,
    pub system_log: Option<Logcat>,
    pub event_log: Option<Logcat>,
    pub vm_traces_just_now: Option<VmTraces>,
    pub vm_traces_last_anr: Option<VmTraces>,
    pub system_properties: BTreeMap<String, String>,
    /// Indices into `logcat.lines`.
    pub interesting_log_lines: Vec<usize>,
    pub all_known_processes: BTreeMap<u32, ProcessInfo>,
    pub sections: Vec<SectionRecord>,
}

impl Bugreport {
    /// Year used for log timestamps that do not carry one.
    pub fn reference_year(&self) -> i32 {
        self.start_time
            .map(|t| t.year())
            .unwrap_or_else(|| Local::now().year())
    }

    /// The flagged lines of the merged logcat, in order.
    pub fn interesting_log_lines(&self) -> Vec<&LogLine> {
        match &self.logcat {
            Some(logcat) => self
                .interesting_log_lines
                .iter()
                .filter_map(|&i| logcat.lines.get(i))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn process(&self, pid: u32) -> Option<&ProcessInfo> {
        self.all_known_processes.get(&pid)
    }

    /// The process that wrote a log line.
    pub fn process_for(&self, line: &LogLine) -> Option<&ProcessInfo> {
        line.pid.and_then(|pid| self.process(pid))
    }

    /// The thread that wrote a log line.
    pub fn thread_for(&self, line: &LogLine) -> Option<&ThreadInfo> {
        let process = self.process_for(line)?;
        line.tid.and_then(|tid| process.threads.get(&tid))
    }

    /// The process an ANR refers to.
    pub fn anr_process(&self) -> Option<&ProcessInfo> {
        self.anr.as_ref()?.pid.and_then(|pid| self.process(pid))
    }

    pub fn section(&self, name: &str) -> Option<&SectionRecord> {
        self.sections.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::logcat_parser::LogBuffer;

    fn log_line(pid: Option<u32>, tid: Option<u32>) -> LogLine {
        LogLine {
            pid,
            tid,
            text: "hello".to_string(),
            ..LogLine::default()
        }
    }

    #[test]
    fn test_reference_year_prefers_start_time() {
        let mut report = Bugreport::default();
        report.start_time = Some(
            chrono::NaiveDate::from_ymd_opt(2016, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        );
        assert_eq!(report.reference_year(), 2016);
    }

    #[test]
    fn test_log_line_resolves_to_process_and_thread() {
        let mut report = Bugreport::default();
        let mut process = ProcessInfo::new(100, "system_server");
        process.threads.insert(
            101,
            ThreadInfo {
                pid: 100,
                tid: 101,
                name: "Binder:100_1".to_string(),
            },
        );
        report.all_known_processes.insert(100, process);

        let line = log_line(Some(100), Some(101));
        assert_eq!(report.process_for(&line).unwrap().cmd_line, "system_server");
        assert_eq!(report.thread_for(&line).unwrap().name, "Binder:100_1");

        let unknown = log_line(Some(7), None);
        assert!(report.process_for(&unknown).is_none());
        assert!(report.thread_for(&log_line(None, Some(101))).is_none());
    }

    #[test]
    fn test_interesting_lines_are_references_into_logcat() {
        let mut report = Bugreport::default();
        let mut logcat = Logcat::new(Some(LogBuffer::Merged));
        logcat.lines.push(log_line(Some(1), None));
        logcat.lines.push(LogLine {
            text: "ANR in com.example".to_string(),
            ..LogLine::default()
        });
        report.logcat = Some(logcat);
        report.interesting_log_lines = vec![1, 42];

        let lines = report.interesting_log_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "ANR in com.example");
    }
}
