use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::mem;
use tracing::{debug, trace};

use super::anr_parser::Anr;
use super::metadata_parser::{MetadataParser, DUMPSTATE_SECTION};
use super::{ParserType, SectionHeader, SectionOutput, SectionParser, VmTracesKind};
use crate::bugreport::{Bugreport, SectionRecord};
use crate::detection::{Inspector, InspectorConfig};
use crate::error::Result;
use crate::lines::{Line, Lines};
use crate::parsers::logcat_parser::{LogBuffer, Logcat};
use crate::utils::{full_match, match_captures, parse_duration_ms};

// ============================================================================
// SECTION MARKERS
// ============================================================================

static SECTION_BEGIN_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r"------ (?P<name>.+?) \((?P<command>.*)\) ------"));
static SECTION_BEGIN_NO_COMMAND_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r"------ (?P<name>[^(]+?) ------"));
static SECTION_END_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(
        r"------ (?P<duration>\d+(?:\.\d+)?)s was the duration of '(?P<name>.*?)(?: \(.*\))?'(?:, ending at: .*?)? ------",
    )
});

fn match_section_begin<'t>(text: &'t str) -> Option<Captures<'t>> {
    match_captures(&SECTION_BEGIN_RE, text).or_else(|| match_captures(&SECTION_BEGIN_NO_COMMAND_RE, text))
}

// ============================================================================
// DRIVER
// ============================================================================

struct OpenSection {
    header: SectionHeader,
    body_start: usize,
}

enum State {
    /// Before the first section marker.
    Preamble,
    InSection(OpenSection),
    /// Between sections.
    NoSection,
}

/// Splits a bugreport into sections, routes each body to the parser
/// registered for its name, then cross-references the result.
///
/// `parse` keeps all its state local to the call, so one parser can be
/// reused for any number of reports.
pub struct BugreportParser {
    metadata_parser: MetadataParser,
    section_parsers: Vec<Box<dyn SectionParser>>,
    /// Section name to index in `section_parsers`.
    registry: HashMap<&'static str, usize>,
    inspector: Inspector,
    monkey_anr: Option<Anr>,
}

impl Default for BugreportParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BugreportParser {
    /// Every built-in section parser, default inspection settings.
    pub fn new() -> Self {
        Self::from_parts(Self::default_section_parsers(), Inspector::default())
    }

    /// Compiles the configured interesting line rules.
    pub fn with_config(config: InspectorConfig) -> Result<Self> {
        Ok(Self::from_parts(Self::default_section_parsers(), Inspector::with_config(config)?))
    }

    /// Only the selected built-in section parsers.
    pub fn from_parser_types(parser_types: &[ParserType], config: InspectorConfig) -> Result<Self> {
        let parsers = parser_types.iter().map(|t| t.create()).collect();
        Ok(Self::from_parts(parsers, Inspector::with_config(config)?))
    }

    /// Replaces the section parsers.
    pub fn with_section_parsers(self, section_parsers: Vec<Box<dyn SectionParser>>) -> Self {
        Self {
            monkey_anr: self.monkey_anr,
            ..Self::from_parts(section_parsers, self.inspector)
        }
    }

    /// An ANR found by the caller (e.g. from a monkey run log). It takes
    /// precedence over ANRs found in the system log.
    pub fn with_monkey_anr(mut self, anr: Anr) -> Self {
        self.monkey_anr = Some(anr);
        self
    }

    fn default_section_parsers() -> Vec<Box<dyn SectionParser>> {
        ParserType::all().into_iter().map(ParserType::create).collect()
    }

    fn from_parts(section_parsers: Vec<Box<dyn SectionParser>>, inspector: Inspector) -> Self {
        let mut registry = HashMap::new();
        for (index, parser) in section_parsers.iter().enumerate() {
            for &name in parser.handled_section_names() {
                if registry.insert(name, index).is_some() {
                    debug!(section = name, "section handled by more than one parser, the last one wins");
                }
            }
        }
        BugreportParser {
            metadata_parser: MetadataParser::new(),
            section_parsers,
            registry,
            inspector,
            monkey_anr: None,
        }
    }

    /// Section names with a registered parser.
    pub fn handled_section_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.registry.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn parse_text(&self, content: &str) -> Result<Bugreport> {
        let lines = Line::split(content);
        self.parse(Lines::new(&lines))
    }

    pub fn parse(&self, mut lines: Lines<'_, Line>) -> Result<Bugreport> {
        lines.start();
        let mut report = Bugreport {
            monkey_anr: self.monkey_anr.clone(),
            ..Bugreport::default()
        };
        let mut state = State::Preamble;

        while lines.has_next() {
            let line = lines.next()?;
            let marker = lines.pos() - 1;

            // End markers first: they would also match the begin pattern.
            if let Some(caps) = match_captures(&SECTION_END_RE, &line.text) {
                let name = &caps["name"];
                let duration_ms = parse_duration_ms(&caps["duration"]);
                trace!(lineno = line.lineno, section = name, "end marker");

                state = match mem::replace(&mut state, State::NoSection) {
                    State::Preamble => {
                        self.metadata_parser.parse_header(lines.copy(0, marker)?, &mut report)?;
                        State::NoSection
                    }
                    State::InSection(open) if open.header.name == name => {
                        self.close_section(open, marker, duration_ms, &lines, &mut report)?;
                        State::NoSection
                    }
                    State::InSection(open) => {
                        debug!(
                            lineno = line.lineno,
                            open = %open.header.name,
                            ended = name,
                            "end marker does not match the open section, ignored"
                        );
                        State::InSection(open)
                    }
                    State::NoSection => State::NoSection,
                };

                if name == DUMPSTATE_SECTION {
                    if let Some(duration_ms) = duration_ms {
                        self.metadata_parser.parse_footer(duration_ms, &mut report);
                    }
                }
                continue;
            }

            if let Some(caps) = match_section_begin(&line.text) {
                let header = SectionHeader::new(
                    &caps["name"],
                    caps.name("command").map(|m| m.as_str()),
                    line.lineno,
                );
                trace!(lineno = line.lineno, section = %header.name, "begin marker");

                match mem::replace(&mut state, State::NoSection) {
                    State::Preamble => {
                        self.metadata_parser.parse_header(lines.copy(0, marker)?, &mut report)?;
                    }
                    State::InSection(open) => {
                        debug!(
                            section = %open.header.name,
                            next = %header.name,
                            "section closed without an end marker"
                        );
                        self.close_section(open, marker, None, &lines, &mut report)?;
                    }
                    State::NoSection => {}
                }
                state = State::InSection(OpenSection {
                    header,
                    body_start: lines.pos(),
                });
            }
        }

        match state {
            State::Preamble => {
                debug!("no section markers, the whole input is preamble");
                self.metadata_parser.parse_header(lines.copy(0, lines.size())?, &mut report)?;
            }
            State::InSection(open) => {
                debug!(section = %open.header.name, "section still open at the end of the input");
                let end = lines.size();
                self.close_section(open, end, None, &lines, &mut report)?;
            }
            State::NoSection => {}
        }

        self.inspector.inspect(&mut report)?;
        Ok(report)
    }

    /// Hands `[body_start, end)` to the registered parser and records the section.
    fn close_section(
        &self,
        open: OpenSection,
        end: usize,
        duration_ms: Option<i64>,
        lines: &Lines<'_, Line>,
        report: &mut Bugreport,
    ) -> Result<()> {
        let OpenSection { header, body_start } = open;
        let body = lines.copy(body_start, end)?;

        let parser = self
            .registry
            .get(header.name.as_str())
            .map(|&index| &self.section_parsers[index]);
        let handled = parser.is_some();
        match parser {
            Some(parser) => {
                let output = parser.parse(&header, body, report)?;
                Self::apply(output, report);
            }
            None => trace!(section = %header.name, "no parser registered, skipped"),
        }

        report.sections.push(SectionRecord {
            name: header.name,
            command: header.command,
            begin_lineno: header.lineno,
            body_start,
            body_end: end,
            duration_ms,
            handled,
        });
        Ok(())
    }

    fn apply(output: SectionOutput, report: &mut Bugreport) {
        match output {
            SectionOutput::Logcat(logcat) => {
                let slot = match logcat.buffer {
                    Some(LogBuffer::System) => &mut report.system_log,
                    Some(LogBuffer::Event) => &mut report.event_log,
                    Some(LogBuffer::Merged) | None => &mut report.logcat,
                };
                Self::append_logcat(slot, logcat);
            }
            SectionOutput::VmTraces { kind, traces } => match kind {
                VmTracesKind::JustNow => report.vm_traces_just_now = Some(traces),
                VmTracesKind::LastAnr => report.vm_traces_last_anr = Some(traces),
            },
            SectionOutput::SystemProperties(properties) => report.system_properties.extend(properties),
            SectionOutput::Empty => {}
        }
    }

    fn append_logcat(slot: &mut Option<Logcat>, logcat: Logcat) {
        match slot {
            Some(existing) => existing.lines.extend(logcat.lines),
            None => *slot = Some(logcat),
        }
    }
}
