// Bugreport loading with ZIP support.
// A `bugreport-*.zip` from `adb bugreport` carries the dumpstate text as one
// of its entries; a plain `.txt` is memory-mapped as is.

use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::zip_utils;

/// Loads a file into memory, automatically extracting the dumpstate if it's a ZIP file
///
/// # Returns
/// * `Ok((Arc<[u8]>, bool))` - The content and whether it was extracted from a ZIP
/// * `Err` - If the file cannot be read or no dumpstate entry is found
pub fn load_bugreport_file<P: AsRef<Path>>(file_path: P) -> Result<(Arc<[u8]>, bool)> {
    let file = File::open(&file_path)?;
    let file_size = file.metadata()?.len();
    if file_size == 0 {
        // Mapping an empty file fails on some platforms.
        return Ok((Arc::from(Vec::new()), false));
    }

    // SAFETY: The file is not modified while the map is open
    let mmap = unsafe { Mmap::map(&file)? };

    if zip_utils::is_zip_file(&mmap) {
        info!("Detected ZIP file, extracting the dumpstate...");
        let dumpstate = zip_utils::extract_dumpstate_from_zip_bytes(&mmap)?;
        info!(
            "Extracted dumpstate: {:.2} MB (original ZIP: {:.2} MB)",
            dumpstate.len() as f64 / 1_048_576.0,
            file_size as f64 / 1_048_576.0
        );
        Ok((Arc::from(dumpstate), true))
    } else {
        info!("Loading plain text file: {:.2} MB", file_size as f64 / 1_048_576.0);
        Ok((Arc::from(&mmap[..]), false))
    }
}

/// Name of a loaded file for progress messages and summaries.
pub fn get_file_description(file_path: &str, is_zip: bool) -> String {
    if is_zip {
        format!("{} (extracted from ZIP)", file_path)
    } else {
        file_path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BugreportError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_plain_text_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "== dumpstate: 2016-01-01 00:00:00").unwrap();
        writeln!(temp_file, "------ SYSTEM LOG (logcat -d) ------").unwrap();
        temp_file.flush().unwrap();

        let (content, is_zip) = load_bugreport_file(temp_file.path()).unwrap();

        assert!(!is_zip);
        let text = String::from_utf8_lossy(&content);
        assert!(text.contains("dumpstate: 2016-01-01"));
        assert!(text.contains("SYSTEM LOG"));
    }

    #[test]
    fn test_load_empty_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let (content, is_zip) = load_bugreport_file(temp_file.path()).unwrap();
        assert!(!is_zip);
        assert!(content.is_empty());
    }

    #[test]
    fn test_load_zip_file() {
        use zip::write::FileOptions;

        let temp_file = NamedTempFile::new().unwrap();
        {
            let mut zip = zip::ZipWriter::new(temp_file.reopen().unwrap());

            zip.start_file("version.txt", FileOptions::default()).unwrap();
            writeln!(zip, "2.0").unwrap();

            zip.start_file("bugreport-NRD90M-2016-01-01-00-00-00.txt", FileOptions::default()).unwrap();
            writeln!(zip, "== dumpstate: 2016-01-01 00:00:00").unwrap();
            writeln!(zip, "------ EVENT LOG (logcat -b events -d) ------").unwrap();

            zip.finish().unwrap();
        }

        let (content, is_zip) = load_bugreport_file(temp_file.path()).unwrap();

        assert!(is_zip);
        let text = String::from_utf8_lossy(&content);
        assert!(text.contains("EVENT LOG"));
        assert!(!text.contains("2.0"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_bugreport_file(dir.path().join("missing.txt"));
        assert!(matches!(result, Err(BugreportError::Io(_))));
    }

    #[test]
    fn test_file_description() {
        assert_eq!(get_file_description("a.zip", true), "a.zip (extracted from ZIP)");
        assert_eq!(get_file_description("a.txt", false), "a.txt");
    }
}
