use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;

/// A log line is interesting when its tag is `tag` and its whole message
/// matches `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestingLineRule {
    pub tag: String,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InterestingLineRule {
    pub fn new(tag: &str, pattern: &str) -> Self {
        InterestingLineRule {
            tag: tag.to_string(),
            pattern: pattern.to_string(),
            description: None,
        }
    }

    fn described(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Inspection settings - can be loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorConfig {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_interesting_lines")]
    pub interesting_lines: Vec<InterestingLineRule>,

    /// Tag and level of the system log lines that carry ANR reports.
    #[serde(default = "default_anr_tag")]
    pub anr_tag: String,
    #[serde(default = "default_anr_level")]
    pub anr_level: char,
}

fn default_interesting_lines() -> Vec<InterestingLineRule> {
    vec![InterestingLineRule::new("ActivityManager", r"ANR in \S+.*").described("ANR reported by the ActivityManager")]
}

fn default_anr_tag() -> String {
    "ActivityManager".to_string()
}

fn default_anr_level() -> char {
    'E'
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            description: Some("Default configuration".to_string()),
            interesting_lines: default_interesting_lines(),
            anr_tag: default_anr_tag(),
            anr_level: default_anr_level(),
        }
    }
}

impl InspectorConfig {
    /// Load configuration from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Save configuration to JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert configuration to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Also flags crashes, watchdog kills and ANR events.
    pub fn extended() -> Self {
        let mut config = Self::default();
        config.description = Some("Crashes, watchdog and ANR events".to_string());
        config.interesting_lines.extend([
            InterestingLineRule::new("AndroidRuntime", r"FATAL EXCEPTION.*").described("Java crash"),
            InterestingLineRule::new("Watchdog", r"\*\*\* WATCHDOG KILLING SYSTEM PROCESS.*")
                .described("system_server watchdog"),
            InterestingLineRule::new("am_anr", r".*").described("ANR event"),
            InterestingLineRule::new("am_crash", r".*").described("crash event"),
        ]);
        config
    }
}
