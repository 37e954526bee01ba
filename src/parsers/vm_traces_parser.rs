use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::thread_snapshot_parser::{is_thread_header, ThreadSnapshot, ThreadSnapshotParser};
use super::{SectionHeader, SectionOutput, SectionParser};
use crate::bugreport::Bugreport;
use crate::error::Result;
use crate::lines::{Line, Lines};
use crate::utils::{full_match, get_int, get_str, match_captures, parse_calendar_named, DATE_TIME_PATTERN};

pub const VM_TRACES_JUST_NOW_SECTION: &str = "VM TRACES JUST NOW";
pub const VM_TRACES_AT_LAST_ANR_SECTION: &str = "VM TRACES AT LAST ANR";

// ============================================================================
// VM TRACES STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmTracesKind {
    JustNow,
    LastAnr,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub cmd_line: String,
    pub date: Option<NaiveDateTime>,
    /// Process level `Key: Value` lines (build fingerprint, ABI...).
    pub attributes: BTreeMap<String, String>,
    pub threads: Vec<ThreadSnapshot>,
}

impl ProcessSnapshot {
    pub fn new(pid: u32, date: Option<NaiveDateTime>) -> Self {
        ProcessSnapshot {
            pid,
            date,
            ..ProcessSnapshot::default()
        }
    }

    pub fn thread(&self, name: &str) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|t| t.name == name)
    }

    pub fn main_thread(&self) -> Option<&ThreadSnapshot> {
        self.thread("main")
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VmTraces {
    pub processes: Vec<ProcessSnapshot>,
    /// Filtered copies of `processes`, filled by inspection.
    pub interesting_processes: Vec<ProcessSnapshot>,
    pub deadlocked_pids: Vec<u32>,
}

impl VmTraces {
    pub fn process(&self, pid: u32) -> Option<&ProcessSnapshot> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn thread_count(&self) -> usize {
        self.processes.iter().map(|p| p.threads.len()).sum()
    }
}

// ============================================================================
// LINE PATTERNS
// ============================================================================

static PROCESS_BEGIN_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(&format!(
        r"----- pid (?P<pid>\d+)(?: at (?P<date>{}))? -----",
        DATE_TIME_PATTERN
    ))
});
static PROCESS_END_RE: Lazy<Regex> = Lazy::new(|| full_match(r"----- end (?P<pid>\d+) -----"));
static CMD_LINE_RE: Lazy<Regex> = Lazy::new(|| full_match(r"Cmd ?line: (?P<cmd>.*)"));
static ATTRIBUTE_RE: Lazy<Regex> = Lazy::new(|| full_match(r"(?P<key>[^:]+): (?P<value>.*)"));

fn is_process_marker(text: &str) -> bool {
    PROCESS_BEGIN_RE.is_match(text) || PROCESS_END_RE.is_match(text)
}

// ============================================================================
// PARSER
// ============================================================================

/// Parses the dalvik/ART stack dumps of one or more processes.
pub struct VmTracesParser {
    thread_parser: ThreadSnapshotParser,
}

impl Default for VmTracesParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VmTracesParser {
    pub fn new() -> Self {
        VmTracesParser {
            thread_parser: ThreadSnapshotParser::new(),
        }
    }

    pub fn parse_lines(&self, mut lines: Lines<'_, Line>, year: i32) -> Result<VmTraces> {
        let mut traces = VmTraces::default();
        let mut current: Option<ProcessSnapshot> = None;

        while lines.has_next() {
            let line = lines.next()?;
            let text = line.text.as_str();

            if let Some(caps) = match_captures(&PROCESS_BEGIN_RE, text) {
                if let Some(done) = current.take() {
                    debug!(pid = done.pid, "process block closed by the next one");
                    traces.processes.push(done);
                }
                let date = match caps.name("date") {
                    Some(_) => Some(parse_calendar_named(&caps, "date", year)?),
                    None => None,
                };
                current = Some(ProcessSnapshot::new(get_int(&caps, "pid", 0), date));
                continue;
            }

            if PROCESS_END_RE.is_match(text) {
                if let Some(done) = current.take() {
                    traces.processes.push(done);
                }
                continue;
            }

            let process = match current.as_mut() {
                Some(process) => process,
                None => {
                    trace!(lineno = line.lineno, "line outside of a process block");
                    continue;
                }
            };

            if is_thread_header(text) {
                let start = lines.pos() - 1;
                let end = Self::find_thread_end(&mut lines)?;
                if let Some(thread) = self.thread_parser.parse(lines.copy(start, end)?, process.pid)? {
                    process.threads.push(thread);
                }
            } else if let Some(caps) = match_captures(&CMD_LINE_RE, text) {
                process.cmd_line = get_str(&caps, "cmd").unwrap_or_default();
            } else if let Some(caps) = match_captures(&ATTRIBUTE_RE, text) {
                if let (Some(key), Some(value)) = (get_str(&caps, "key"), get_str(&caps, "value")) {
                    process.attributes.insert(key, value);
                }
            }
        }

        if let Some(done) = current {
            debug!(pid = done.pid, "process block closed by the end of the section");
            traces.processes.push(done);
        }
        Ok(traces)
    }

    /// Advances past the current thread block and returns its end position
    /// (exclusive). A following header or process marker is left unread.
    fn find_thread_end(lines: &mut Lines<'_, Line>) -> Result<usize> {
        while lines.has_next() {
            let text = lines.next()?.text.as_str();
            if text.trim().is_empty() {
                return Ok(lines.pos() - 1);
            }
            if is_thread_header(text) || is_process_marker(text) {
                lines.rewind();
                return Ok(lines.pos());
            }
        }
        Ok(lines.pos())
    }
}

impl SectionParser for VmTracesParser {
    fn handled_section_names(&self) -> &[&'static str] {
        &[VM_TRACES_JUST_NOW_SECTION, VM_TRACES_AT_LAST_ANR_SECTION]
    }

    fn parse(&self, header: &SectionHeader, lines: Lines<'_, Line>, report: &Bugreport) -> Result<SectionOutput> {
        let kind = if header.name == VM_TRACES_AT_LAST_ANR_SECTION {
            VmTracesKind::LastAnr
        } else {
            VmTracesKind::JustNow
        };
        let traces = self.parse_lines(lines, report.reference_year())?;
        Ok(SectionOutput::VmTraces { kind, traces })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::thread_snapshot_parser::ThreadKind;
    use chrono::Datelike;

    fn parse(content: &str) -> VmTraces {
        let storage = Line::split(content);
        VmTracesParser::new().parse_lines(Lines::new(&storage), 2016).unwrap()
    }

    const TWO_PROCESSES: &str = r#"
----- pid 12345 at 2025-03-28 10:30:45 -----
Cmd line: com.example.app
Build fingerprint: 'google/xxx/release-keys'
ABI: 'arm64'

DALVIK THREADS (3):
"main" prio=5 tid=1 Native
  | group="main" sCount=1 dsCount=0 flags=1 obj=0x72f12a98 self=0xb400007e00001e50
  | sysTid=12345 nice=0 cgrp=default sched=0/0 handle=0x7ff1234567
  at java.lang.Object.wait(Native Method)
  at com.example.app.MainActivity.onCreate(MainActivity.java:25)
"Thread-2" daemon prio=5 tid=15 Runnable
  | sysTid=12360 nice=0 cgrp=default sched=0/0 handle=0x7f89abcdef
  at com.example.app.BackgroundTask.run(BackgroundTask.java:50)

"binder:12345_1" sysTid=12350
  #00 pc 000000000009a3c4  /system/lib64/libc.so (__ioctl+4)

----- end 12345 -----

----- pid 999 -----
Cmdline: system_server
"main" prio=5 tid=1 Native
  at android.os.MessageQueue.nativePollOnce(Native method)
----- end 999 -----
"#;

    #[test]
    fn test_parse_processes_and_threads() {
        let traces = parse(TWO_PROCESSES);
        assert_eq!(traces.processes.len(), 2);

        let app = &traces.processes[0];
        assert_eq!(app.pid, 12345);
        assert_eq!(app.cmd_line, "com.example.app");
        assert_eq!(app.date.unwrap().year(), 2025);
        assert_eq!(app.attributes.get("ABI").map(String::as_str), Some("'arm64'"));
        assert_eq!(app.threads.len(), 3);
        assert_eq!(app.threads[0].name, "main");
        assert_eq!(app.threads[0].frames.len(), 2);
        assert_eq!(app.threads[1].name, "Thread-2");
        assert_eq!(app.threads[1].frames.len(), 1);
        assert_eq!(app.threads[2].kind, ThreadKind::Unmanaged);
        assert!(app.threads.iter().all(|t| t.pid == 12345));

        let system = &traces.processes[1];
        assert_eq!(system.cmd_line, "system_server");
        assert!(system.date.is_none());
        assert_eq!(system.main_thread().unwrap().frames.len(), 1);
    }

    #[test]
    fn test_missing_end_marker_closes_implicitly() {
        let traces = parse(
            "----- pid 1 -----\nCmd line: first\n\"main\" prio=5 tid=1 Native\n  at a.B.c(B.java:1)\n----- pid 2 -----\nCmd line: second",
        );
        assert_eq!(traces.processes.len(), 2);
        assert_eq!(traces.processes[0].threads.len(), 1);
        assert_eq!(traces.processes[0].threads[0].frames.len(), 1);
        assert_eq!(traces.processes[1].cmd_line, "second");
    }

    #[test]
    fn test_lines_outside_processes_are_skipped() {
        let traces = parse("garbage\n\"main\" prio=5 tid=1 Native\n----- end 5 -----");
        assert!(traces.processes.is_empty());
    }

    #[test]
    fn test_thread_count() {
        assert_eq!(parse(TWO_PROCESSES).thread_count(), 4);
    }

    #[test]
    fn test_section_kind_follows_name() {
        let storage = Line::split("----- pid 1 -----\n----- end 1 -----");
        let parser = VmTracesParser::new();
        let header = SectionHeader::new(VM_TRACES_AT_LAST_ANR_SECTION, None, 1);
        match parser.parse(&header, Lines::new(&storage), &Bugreport::default()).unwrap() {
            SectionOutput::VmTraces { kind, traces } => {
                assert_eq!(kind, VmTracesKind::LastAnr);
                assert_eq!(traces.processes.len(), 1);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }
}
