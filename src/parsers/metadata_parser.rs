use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::bugreport::Bugreport;
use crate::error::Result;
use crate::lines::{Line, Lines};
use crate::utils::{full_match, get_str, match_captures, parse_calendar_named, DATE_TIME_PATTERN};

/// Name of the pseudo section whose end marker carries the total dumpstate duration.
pub const DUMPSTATE_SECTION: &str = "DUMPSTATE";

pub const BUILD_KEY: &str = "Build";

static DUMPSTATE_RE: Lazy<Regex> =
    Lazy::new(|| full_match(&format!(r"== dumpstate: (?P<date>{})", DATE_TIME_PATTERN)));
static HEADER_RE: Lazy<Regex> = Lazy::new(|| full_match(r"(?P<key>[^:]+): (?P<value>.*)"));

/// Reads the bugreport preamble and footer.
pub struct MetadataParser;

impl Default for MetadataParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataParser {
    pub fn new() -> Self {
        MetadataParser
    }

    /// Fills `start_time`, `build_id` and the header map from the lines
    /// before the first section.
    pub fn parse_header(&self, mut lines: Lines<'_, Line>, report: &mut Bugreport) -> Result<()> {
        while lines.has_next() {
            let line = lines.next()?;
            let text = line.text.as_str();

            if let Some(caps) = match_captures(&DUMPSTATE_RE, text) {
                let start = parse_calendar_named(&caps, "date", report.reference_year())?;
                debug!(start = %start, "dumpstate start time");
                report.start_time = Some(start);
            } else if let Some(caps) = match_captures(&HEADER_RE, text) {
                let (Some(key), Some(value)) = (get_str(&caps, "key"), get_str(&caps, "value")) else {
                    continue;
                };
                let key = key.trim().to_string();
                if key == BUILD_KEY {
                    report.build_id = Some(value.trim().to_string());
                }
                report.header.insert(key, value);
            } else {
                trace!(lineno = line.lineno, "unrecognized preamble line");
            }
        }
        Ok(())
    }

    /// `end_time = start_time + duration`. Does nothing without a start time
    /// or when the sum is out of range.
    pub fn parse_footer(&self, duration_ms: i64, report: &mut Bugreport) {
        let Some(start) = report.start_time else {
            debug!(duration_ms, "dumpstate duration without a start time");
            return;
        };
        match Duration::try_milliseconds(duration_ms).and_then(|d| start.checked_add_signed(d)) {
            Some(end) => report.end_time = Some(end),
            None => debug!(duration_ms, "dumpstate duration out of range"),
        }
    }
}
