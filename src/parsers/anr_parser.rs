use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::logcat_parser::LogLine;
use super::vm_traces_parser::VmTraces;
use crate::error::Result;
use crate::lines::Lines;
use crate::utils::{full_match, get_str, match_captures};

// ============================================================================
// ANR STRUCTURES
// ============================================================================

/// An "Application Not Responding" report from the ActivityManager.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Anr {
    pub process_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<String>,
    /// Everything else the ActivityManager printed for this ANR (cpu usage...).
    pub detail_lines: Vec<String>,
    pub lineno: usize,
    pub time: Option<NaiveDateTime>,
    /// Stacks taken for this ANR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_traces: Option<VmTraces>,
}

// ============================================================================
// PARSER
// ============================================================================

static ANR_IN_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r"ANR in (?P<process>\S+)(?:\s+\((?P<component>[^)]*)\))?.*"));
static PID_RE: Lazy<Regex> = Lazy::new(|| full_match(r"PID: (?P<pid>\d+)"));
static REASON_RE: Lazy<Regex> = Lazy::new(|| full_match(r"Reason: (?P<value>.*)"));
static PARENT_RE: Lazy<Regex> = Lazy::new(|| full_match(r"Parent: (?P<value>.*)"));
static LOAD_RE: Lazy<Regex> = Lazy::new(|| full_match(r"Load: (?P<value>.*)"));

/// Extracts ANRs from ActivityManager error lines.
///
/// An `ANR in` line opens a report. The following lines written by the same
/// pid and tid belong to it, until the next `ANR in`.
pub struct AnrParser;

impl Default for AnrParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AnrParser {
    pub fn new() -> Self {
        AnrParser
    }

    pub fn parse(&self, mut lines: Lines<'_, LogLine>) -> Result<Vec<Anr>> {
        let mut anrs = Vec::new();
        let mut current: Option<(Anr, Option<u32>, Option<u32>)> = None;

        while lines.has_next() {
            let line = lines.next()?;

            if let Some(caps) = match_captures(&ANR_IN_RE, &line.text) {
                if let Some((done, _, _)) = current.take() {
                    anrs.push(done);
                }
                let anr = Anr {
                    process_name: get_str(&caps, "process").unwrap_or_default(),
                    component: get_str(&caps, "component"),
                    lineno: line.lineno,
                    time: line.time,
                    ..Anr::default()
                };
                debug!(process = %anr.process_name, lineno = line.lineno, "found ANR");
                current = Some((anr, line.pid, line.tid));
                continue;
            }

            let Some((anr, pid, tid)) = current.as_mut() else {
                continue;
            };
            if line.pid != *pid || line.tid != *tid {
                continue;
            }
            for text in line.text.lines() {
                Self::apply_detail(anr, text);
            }
        }

        if let Some((done, _, _)) = current {
            anrs.push(done);
        }
        Ok(anrs)
    }

    fn apply_detail(anr: &mut Anr, text: &str) {
        if let Some(caps) = match_captures(&PID_RE, text) {
            anr.pid = caps["pid"].parse().ok();
        } else if let Some(caps) = match_captures(&REASON_RE, text) {
            anr.reason = get_str(&caps, "value");
        } else if let Some(caps) = match_captures(&PARENT_RE, text) {
            anr.parent = get_str(&caps, "value");
        } else if let Some(caps) = match_captures(&LOAD_RE, text) {
            anr.load = get_str(&caps, "value");
        } else {
            anr.detail_lines.push(text.to_string());
        }
    }
}
