use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{SectionHeader, SectionOutput, SectionParser};
use crate::bugreport::Bugreport;
use crate::error::Result;
use crate::lines::{Line, Lines, TextLine};
use crate::utils::{full_match, get_str, match_captures, parse_calendar_named, LOG_DATE_TIME_PATTERN};

pub const SYSTEM_LOG_SECTION: &str = "SYSTEM LOG";
pub const EVENT_LOG_SECTION: &str = "EVENT LOG";

// ============================================================================
// LOGCAT STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBuffer {
    System,
    Event,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLine {
    pub lineno: usize,
    /// Header line followed by every continuation line, joined by `\n`.
    pub raw_text: String,
    /// Set for `--------- beginning of <buffer>` lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_begin: Option<String>,
    pub time: Option<NaiveDateTime>,
    pub pid: Option<u32>,
    pub tid: Option<u32>,
    pub level: Option<char>,
    pub tag: Option<String>,
    /// Message text, continuation lines appended with `\n`.
    pub text: String,
    pub region_anr: bool,
    pub region_bugreport: bool,
}

impl LogLine {
    fn orphan(line: &Line) -> Self {
        LogLine {
            lineno: line.lineno,
            raw_text: line.text.clone(),
            text: line.text.clone(),
            ..LogLine::default()
        }
    }

    fn append(&mut self, line: &Line) {
        self.raw_text.push('\n');
        self.raw_text.push_str(&line.text);
        self.text.push('\n');
        self.text.push_str(&line.text);
    }

    pub fn is_buffer_begin(&self) -> bool {
        self.buffer_begin.is_some()
    }
}

impl TextLine for LogLine {
    fn text(&self) -> &str {
        &self.text
    }

    fn lineno(&self) -> usize {
        self.lineno
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Logcat {
    pub buffer: Option<LogBuffer>,
    pub lines: Vec<LogLine>,
}

impl Logcat {
    pub fn new(buffer: Option<LogBuffer>) -> Self {
        Logcat {
            buffer,
            lines: Vec::new(),
        }
    }

    /// Lines with the given tag and level, in order.
    pub fn filter(&self, tag: &str, level: char) -> Vec<LogLine> {
        self.lines
            .iter()
            .filter(|l| l.level == Some(level) && l.tag.as_deref() == Some(tag))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ============================================================================
// LINE FORMATS
// ============================================================================

static BUFFER_BEGIN_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r"--------- beginning of (?P<buffer>.*)"));

/// Header formats in the order they are tried.
static LOG_FORMATS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "threadtime",
            full_match(&format!(
                r"(?P<date>{})\s+(?:(?P<uid>\S+)\s+)?(?P<pid>\d+)\s+(?P<tid>\d+)\s+(?P<level>[VDIWEFSA])\s+(?P<tag>.*?)\s*:\s?(?P<msg>.*)",
                LOG_DATE_TIME_PATTERN
            )),
        ),
        (
            "time",
            full_match(&format!(
                r"(?P<date>{})\s+(?P<level>[VDIWEFSA])/(?P<tag>.*?)\(\s*(?P<pid>\d+)\):\s?(?P<msg>.*)",
                LOG_DATE_TIME_PATTERN
            )),
        ),
        (
            "thread",
            full_match(r"(?P<level>[VDIWEFSA])\(\s*(?P<pid>\d+):\s*(?P<tid>\d+)\)\s?(?P<msg>.*)"),
        ),
        (
            "brief",
            full_match(r"(?P<level>[VDIWEFSA])/(?P<tag>.*?)\(\s*(?P<pid>\d+)\):\s?(?P<msg>.*)"),
        ),
    ]
});

/// The buffer name of a `--------- beginning of <buffer>` line.
pub fn buffer_begin_name(text: &str) -> Option<&str> {
    BUFFER_BEGIN_RE
        .captures(text)
        .and_then(|caps| caps.name("buffer"))
        .map(|m| m.as_str())
}

// ============================================================================
// PARSER
// ============================================================================

pub struct LogcatParser;

impl Default for LogcatParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogcatParser {
    pub fn new() -> Self {
        LogcatParser
    }

    /// Parses a run of logcat lines. A header line starts a new record, any
    /// other line continues the current one. Times without a year take `year`.
    pub fn parse_lines(&self, mut lines: Lines<'_, Line>, buffer: Option<LogBuffer>, year: i32) -> Result<Logcat> {
        let mut logcat = Logcat::new(buffer);
        let mut current: Option<LogLine> = None;

        while lines.has_next() {
            let line = lines.next()?;
            match Self::parse_header(line, year)? {
                Some(header) => {
                    if let Some(done) = current.replace(header) {
                        logcat.lines.push(done);
                    }
                }
                None => match current.as_mut() {
                    Some(record) => record.append(line),
                    None => {
                        trace!(lineno = line.lineno, "logcat starts without a header line");
                        current = Some(LogLine::orphan(line));
                    }
                },
            }
        }

        if let Some(done) = current {
            logcat.lines.push(done);
        }
        Ok(logcat)
    }

    fn parse_header(line: &Line, year: i32) -> Result<Option<LogLine>> {
        if let Some(buffer) = buffer_begin_name(&line.text) {
            return Ok(Some(LogLine {
                lineno: line.lineno,
                raw_text: line.text.clone(),
                buffer_begin: Some(buffer.to_string()),
                text: line.text.clone(),
                ..LogLine::default()
            }));
        }

        for (format, re) in LOG_FORMATS.iter() {
            if let Some(caps) = match_captures(re, &line.text) {
                trace!(lineno = line.lineno, format = *format, "logcat header");
                return Self::from_captures(line, &caps, year).map(Some);
            }
        }
        Ok(None)
    }

    fn from_captures(line: &Line, caps: &Captures<'_>, year: i32) -> Result<LogLine> {
        let time = match caps.name("date") {
            Some(_) => Some(parse_calendar_named(caps, "date", year)?),
            None => None,
        };

        Ok(LogLine {
            lineno: line.lineno,
            raw_text: line.text.clone(),
            buffer_begin: None,
            time,
            pid: caps.name("pid").and_then(|m| m.as_str().parse().ok()),
            tid: caps.name("tid").and_then(|m| m.as_str().parse().ok()),
            level: caps.name("level").and_then(|m| m.as_str().chars().next()),
            tag: get_str(caps, "tag").map(|t| t.trim().to_string()),
            text: get_str(caps, "msg").unwrap_or_default(),
            region_anr: false,
            region_bugreport: false,
        })
    }
}

impl SectionParser for LogcatParser {
    fn handled_section_names(&self) -> &[&'static str] {
        &[SYSTEM_LOG_SECTION, EVENT_LOG_SECTION]
    }

    fn parse(&self, header: &SectionHeader, lines: Lines<'_, Line>, report: &Bugreport) -> Result<SectionOutput> {
        let buffer = match header.name.as_str() {
            SYSTEM_LOG_SECTION => LogBuffer::System,
            EVENT_LOG_SECTION => LogBuffer::Event,
            _ => LogBuffer::Merged,
        };
        let logcat = self.parse_lines(lines, Some(buffer), report.reference_year())?;
        Ok(SectionOutput::Logcat(logcat))
    }
}
