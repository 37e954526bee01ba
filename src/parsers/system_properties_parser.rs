use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::trace;

use super::{SectionHeader, SectionOutput, SectionParser};
use crate::bugreport::Bugreport;
use crate::error::Result;
use crate::lines::{Line, Lines};
use crate::utils::{full_match, match_captures};

pub const SYSTEM_PROPERTIES_SECTION: &str = "SYSTEM PROPERTIES";

static PROPERTY_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r"\[(?P<key>[^\]]*)\]: \[(?P<value>.*)\]"));

/// `getprop` output: one `[key]: [value]` per line.
pub struct SystemPropertiesParser;

impl Default for SystemPropertiesParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPropertiesParser {
    pub fn new() -> Self {
        SystemPropertiesParser
    }

    pub fn parse_lines(&self, lines: Lines<'_, Line>) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        for line in lines.iter() {
            match match_captures(&PROPERTY_RE, &line.text) {
                Some(caps) => {
                    properties.insert(caps["key"].to_string(), caps["value"].to_string());
                }
                None => trace!(lineno = line.lineno, "not a property line"),
            }
        }
        properties
    }
}

impl SectionParser for SystemPropertiesParser {
    fn handled_section_names(&self) -> &[&'static str] {
        &[SYSTEM_PROPERTIES_SECTION]
    }

    fn parse(&self, _header: &SectionHeader, lines: Lines<'_, Line>, _report: &Bugreport) -> Result<SectionOutput> {
        Ok(SectionOutput::SystemProperties(self.parse_lines(lines)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_properties() {
        let storage = Line::split(
            r#"[dalvik.vm.heapsize]: [512m]
[ro.build.fingerprint]: [google/walleye/walleye:8.1.0/OPM1.171019.011/4448085:user/release-keys]
[ro.empty]: []
this line is ignored
[persist.sys.locale]: [en-US]"#,
        );
        let properties = SystemPropertiesParser::new().parse_lines(Lines::new(&storage));
        assert_eq!(properties.len(), 4);
        assert_eq!(properties["dalvik.vm.heapsize"], "512m");
        assert_eq!(properties["ro.empty"], "");
        assert!(properties["ro.build.fingerprint"].ends_with("release-keys"));
    }
}
