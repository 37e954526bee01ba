use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress display for loading and parsing bugreports
pub struct ProgressTracker {
    multi: MultiProgress,
    enabled: bool,
}

impl ProgressTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Spinner while a file is read or extracted
    pub fn create_load_progress(&self, file_description: &str) -> Option<ProgressBar> {
        if !self.enabled {
            return None;
        }

        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}").ok()?);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("📂 Loading {}...", file_description));
        Some(pb)
    }

    /// Bar over the reports being parsed concurrently
    pub fn create_parse_progress(&self, total_reports: usize) -> Option<ProgressBar> {
        if !self.enabled {
            return None;
        }

        let pb = self.multi.add(ProgressBar::new(total_reports as u64));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} reports")
                .ok()?
                .progress_chars("#>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("📊 Parsing bugreports concurrently...");
        Some(pb)
    }

    /// Finish a progress bar with success message
    pub fn finish_with_message(pb: Option<ProgressBar>, message: &str) {
        if let Some(pb) = pb {
            pb.finish_with_message(message.to_string());
        }
    }

    /// Finish a progress bar and clear it
    pub fn finish_and_clear(pb: Option<ProgressBar>) {
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
    }

    /// Update progress bar position
    pub fn set_position(pb: &Option<ProgressBar>, pos: u64) {
        if let Some(pb) = pb {
            pb.set_position(pos);
        }
    }
}
