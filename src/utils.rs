//! Utility functions for file handling and common operations

use crate::{VarscoreError, VarscoreResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Check if a file is gzip compressed
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> VarscoreResult<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0; 2];

    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(VarscoreError::Io(e)),
    }
}

/// Open a text table for reading, decompressing gzip input transparently
pub fn open_reader<P: AsRef<Path>>(path: P) -> VarscoreResult<Box<dyn BufRead>> {
    let file = File::open(&path)
        .map_err(|_| VarscoreError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    let reader: Box<dyn BufRead> = if is_gzipped(&path)? {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    Ok(reader)
}

/// Create an output writer; a `.gz` extension selects gzip compression
pub fn create_writer<P: AsRef<Path>>(path: P) -> VarscoreResult<Box<dyn Write>> {
    let file = File::create(&path)?;
    let writer: Box<dyn Write> = if has_extension(&path, "gz") {
        Box::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
    } else {
        Box::new(BufWriter::new(file))
    };
    Ok(writer)
}

/// Get the number of CPU cores, with a fallback default
pub fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Validate file paths and check if they exist
pub fn validate_file_exists<P: AsRef<Path>>(path: P) -> VarscoreResult<()> {
    if !path.as_ref().exists() {
        return Err(VarscoreError::FileNotFound(
            path.as_ref().to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

/// Validate that a file is readable
pub fn validate_file_readable<P: AsRef<Path>>(path: P) -> VarscoreResult<()> {
    validate_file_exists(&path)?;

    File::open(&path).map_err(|_| {
        VarscoreError::FileNotFound(path.as_ref().to_string_lossy().to_string())
    })?;

    Ok(())
}

/// The directory holding an output prefix must already exist
pub fn validate_output_prefix(prefix: &str) -> VarscoreResult<()> {
    let parent = Path::new(prefix)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    if !parent.is_dir() {
        return Err(VarscoreError::InvalidConfig(format!(
            "Output directory does not exist: {}",
            parent.display()
        )));
    }
    Ok(())
}

/// Check if a path has a specific extension
pub fn has_extension<P: AsRef<Path>>(path: P, extension: &str) -> bool {
    path.as_ref()
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Format a file size in bytes to a human-readable string
pub fn format_file_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Log progress information
pub fn log_progress(current: usize, total: usize, message: &str) {
    if total > 0 {
        let percentage = (current as f64 / total as f64) * 100.0;
        log::info!("{}: {} / {} ({:.1}%)", message, current, total, percentage);
    }
}

/// Timer utility for measuring execution time
pub struct Timer {
    start: std::time::Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::info!("Starting timer: {}", name);
        Timer {
            start: std::time::Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    pub fn log_elapsed(&self) {
        let duration = self.elapsed();
        log::info!("Timer '{}' elapsed: {:.2?}", self.name, duration);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.log_elapsed();
    }
}

/// Memory usage reporting utility
pub fn log_memory_usage(context: &str) {
    #[cfg(unix)]
    {
        use std::fs;
        if let Ok(status) = fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(memory_str) = line.split_whitespace().nth(1) {
                        if let Ok(memory_kb) = memory_str.parse::<u64>() {
                            log::info!("Memory usage ({}): {} MB", context, memory_kb / 1024);
                        }
                    }
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        log::debug!("Memory usage logging not supported on this platform ({})", context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_is_gzipped() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "chr1\t100").unwrap();
        assert!(!is_gzipped(temp_file.path()).unwrap());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[0x1f, 0x8b]).unwrap();
        assert!(is_gzipped(temp_file.path()).unwrap());
    }

    #[test]
    fn test_open_reader_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sizes.tsv.gz");
        {
            let mut writer = create_writer(&path).unwrap();
            writeln!(writer, "chr1\t1000").unwrap();
        }
        assert!(is_gzipped(&path).unwrap());

        let mut content = String::new();
        open_reader(&path).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "chr1\t1000\n");
    }

    #[test]
    fn test_validate_file_exists() {
        let temp_file = NamedTempFile::new().unwrap();
        assert!(validate_file_exists(temp_file.path()).is_ok());
        assert!(validate_file_exists("/nonexistent/file").is_err());
    }

    #[test]
    fn test_validate_output_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("run1");
        assert!(validate_output_prefix(prefix.to_str().unwrap()).is_ok());
        assert!(validate_output_prefix("run1").is_ok());

        let missing = dir.path().join("missing").join("run1");
        match validate_output_prefix(missing.to_str().unwrap()) {
            Err(VarscoreError::InvalidConfig(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("scores.tsv.gz", "gz"));
        assert!(has_extension("scores.GZ", "gz"));
        assert!(!has_extension("scores.tsv", "gz"));
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512.00 B");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new("test");
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(timer.elapsed().as_millis() >= 1);
    }
}
