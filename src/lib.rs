use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod bugreport;
pub mod detection;
pub mod error;
pub mod file_loader;
pub mod lines;
pub mod parsers;
pub mod progress;
pub mod utils;
pub mod zip_utils;

pub use bugreport::{Bugreport, ProcessInfo, SectionRecord, ThreadInfo};
pub use detection::{Inspector, InspectorConfig, InterestingLineRule};
pub use error::{BugreportError, Result};
pub use lines::{Line, Lines, TextLine};
pub use parsers::{BugreportParser, ParserType, SectionParser};

/// Parses one bugreport held in memory.
///
/// Invalid UTF-8 is replaced rather than rejected, a bugreport routinely
/// carries binary garbage in some sections.
pub fn parse_bugreport_bytes(data: &[u8], parser_types: &[ParserType], config: &InspectorConfig) -> Result<Bugreport> {
    let parser = BugreportParser::from_parser_types(parser_types, config.clone())?;
    let content = String::from_utf8_lossy(data);
    let storage = Line::split(&content);
    parser.parse(Lines::new(&storage))
}

/// Parses several bugreports concurrently using Rayon.
///
/// Each input gets its own parser on the thread pool; nothing is shared
/// between the parses but the immutable file content.
///
/// # Arguments
///
/// * `inputs` - Pairs of a display name and the raw bytes of a bugreport
///   (a memory-mapped region or an extracted ZIP entry).
/// * `parser_types` - The section parsers to register for every report.
/// * `config` - The inspection settings.
///
/// # Returns
///
/// A vector of tuples, in input order, where each tuple contains the name,
/// the `Result` of the parse and the `Duration` it took to complete.
pub fn parse_bugreports_concurrently(
    inputs: Vec<(String, Arc<[u8]>)>,
    parser_types: &[ParserType],
    config: &InspectorConfig,
) -> Vec<(String, Result<Bugreport>, Duration)> {
    inputs
        .into_par_iter()
        .map(|(name, content)| {
            let start = Instant::now();
            let result = parse_bugreport_bytes(&content, parser_types, config);
            (name, result, start.elapsed())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "== dumpstate: 2016-01-01 00:00:00\n\
                          Build: NRD90M\n\
                          ------ SYSTEM PROPERTIES (getprop) ------\n\
                          [ro.build.id]: [NRD90M]\n\
                          ------ 0.0s was the duration of 'SYSTEM PROPERTIES' ------\n\
                          ------ SYSTEM LOG (logcat -d) ------\n\
                          01-01 00:00:01.000  1500  1620 I ActivityManager: Start proc\n\
                          ------ 0.1s was the duration of 'SYSTEM LOG' ------\n";

    fn input(name: &str, content: &[u8]) -> (String, Arc<[u8]>) {
        (name.to_string(), Arc::from(content.to_vec()))
    }

    #[test]
    fn test_parse_bugreport_bytes() {
        let report = parse_bugreport_bytes(REPORT.as_bytes(), &ParserType::all(), &InspectorConfig::default()).unwrap();
        assert_eq!(report.build_id.as_deref(), Some("NRD90M"));
        assert_eq!(report.system_properties.get("ro.build.id").map(String::as_str), Some("NRD90M"));
        assert_eq!(report.logcat.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_only_selected_parsers_run() {
        let report =
            parse_bugreport_bytes(REPORT.as_bytes(), &[ParserType::SystemProperties], &InspectorConfig::default())
                .unwrap();
        assert!(report.system_log.is_none());
        assert!(report.logcat.is_none());
        assert!(!report.section("SYSTEM LOG").unwrap().handled);
        assert!(report.section("SYSTEM PROPERTIES").unwrap().handled);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut data = REPORT.as_bytes().to_vec();
        data.extend_from_slice(b"------ BINARY ------\n\xff\xfe\n");
        let report = parse_bugreport_bytes(&data, &ParserType::all(), &InspectorConfig::default()).unwrap();
        assert!(report.section("BINARY").is_some());
    }

    #[test]
    fn test_parse_bugreports_concurrently_keeps_order() {
        let inputs = vec![
            input("first", REPORT.as_bytes()),
            input("empty", b""),
            input("second", REPORT.replace("NRD90M", "OPM1").as_bytes()),
        ];

        let results = parse_bugreports_concurrently(inputs, &ParserType::all(), &InspectorConfig::default());

        let names: Vec<&str> = results.iter().map(|(name, _, _)| name.as_str()).collect();
        assert_eq!(names, vec!["first", "empty", "second"]);
        assert!(results.iter().all(|(_, result, _)| result.is_ok()));
        assert_eq!(results[2].1.as_ref().unwrap().build_id.as_deref(), Some("OPM1"));
        assert!(results[1].1.as_ref().unwrap().sections.is_empty());
    }

    #[test]
    fn test_invalid_config_fails_every_input() {
        let mut config = InspectorConfig::default();
        config.interesting_lines.push(InterestingLineRule::new("Tag", "[broken"));

        let results = parse_bugreports_concurrently(vec![input("a", REPORT.as_bytes())], &ParserType::all(), &config);

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, Err(BugreportError::Pattern(_))));
    }

    #[test]
    fn test_empty_input_list() {
        let results = parse_bugreports_concurrently(Vec::new(), &ParserType::all(), &InspectorConfig::default());
        assert!(results.is_empty());
    }
}
