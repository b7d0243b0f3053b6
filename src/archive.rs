//! Reads log history the live tailer does not replay: the current file's
//! head/tail, and rotated archive files (transparently gzip-decompressed).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;

use crate::error::ArchiveError;

/// Leaves filename-typical characters unescaped; encodes everything else,
/// including `/` so each escaped segment can be safely rejoined.
const ARCHIVE_NAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-').remove(b'.');

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// Returns the last `limit` non-empty lines of a file's current content.
/// `limit == 0` returns every line.
pub fn read_current(path: &Path, limit: usize) -> Result<Vec<String>, ArchiveError> {
    let bytes = std::fs::read(path).map_err(|source| ArchiveError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(tail_lines(&bytes, limit))
}

/// Lists archive files matching `pattern` under `root`, newest first.
pub fn list_archives(root: &Path, pattern: &str) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let full_pattern = root.join(pattern);
    let full_pattern_str = full_pattern.to_string_lossy().to_string();

    let paths = glob::glob(&full_pattern_str).map_err(|source| ArchiveError::Glob {
        pattern: full_pattern_str,
        source,
    })?;

    let mut entries = Vec::new();
    for path in paths.flatten() {
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let modified: DateTime<Utc> = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        let relative = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
        let name = relative
            .split('/')
            .map(|segment| percent_encoding::utf8_percent_encode(segment, ARCHIVE_NAME_ESCAPE).to_string())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(ArchiveEntry { name, modified });
    }

    entries.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(entries)
}

/// Reads an archive file by name relative to `root`, transparently
/// decompressing gzip content, and returns its tail.
pub fn read_archive(root: &Path, name: &str, limit: usize) -> Result<Vec<String>, ArchiveError> {
    let path = resolve_archive_path(root, name)?;
    if !path.is_file() {
        return Err(ArchiveError::NotFound { path });
    }

    let mut file = File::open(&path).map_err(|source| ArchiveError::Read {
        path: path.clone(),
        source,
    })?;

    let mut sniff = vec![0u8; 512];
    let n = file.read(&mut sniff).map_err(|source| ArchiveError::Read {
        path: path.clone(),
        source,
    })?;
    sniff.truncate(n);

    let mut rest = Vec::new();
    file.read_to_end(&mut rest).map_err(|source| ArchiveError::Read {
        path: path.clone(),
        source,
    })?;

    let mut full = sniff;
    full.extend_from_slice(&rest);

    let decompressed = if is_gzip(&full) {
        let mut decoder = GzDecoder::new(full.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|source| ArchiveError::Read {
            path: path.clone(),
            source,
        })?;
        out
    } else {
        full
    };

    Ok(tail_lines(&decompressed, limit))
}

/// Rejects archive names that would escape `root` via `..` or an absolute path.
fn resolve_archive_path(root: &Path, name: &str) -> Result<PathBuf, ArchiveError> {
    let candidate = root.join(name);
    if name.split('/').any(|segment| segment == "..") {
        return Err(ArchiveError::NotFound { path: candidate });
    }
    Ok(candidate)
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn tail_lines(bytes: &[u8], limit: usize) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().collect();
    let start = if limit == 0 || lines.len() <= limit {
        0
    } else {
        lines.len() - limit
    };
    lines[start..].iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tail_lines_respects_limit() {
        let content = b"a\nb\nc\nd\n";
        assert_eq!(tail_lines(content, 2), vec!["c", "d"]);
        assert_eq!(tail_lines(content, 0), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn reads_plain_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.log.1"), b"one\ntwo\n").unwrap();
        let lines = read_archive(dir.path(), "app.log.1", 0).unwrap();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn reads_gzip_archive_transparently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log.1.gz");
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"one\ntwo\nthree\n").unwrap();
        let compressed = encoder.finish().unwrap();
        std::fs::write(&path, compressed).unwrap();

        let lines = read_archive(dir.path(), "app.log.1.gz", 2).unwrap();
        assert_eq!(lines, vec!["two", "three"]);
    }

    #[test]
    fn rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_archive(dir.path(), "../secret", 0);
        assert!(result.is_err());
    }

    #[test]
    fn lists_archives_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log.1"), b"x").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(dir.path().join("a.log.2"), b"x").unwrap();

        let entries = list_archives(dir.path(), "a.log.*").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].modified >= entries[1].modified);
    }

    #[test]
    fn lists_archives_escapes_special_characters_in_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app log #1.log"), b"x").unwrap();

        let entries = list_archives(dir.path(), "*.log").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "app%20log%20%231.log");
    }
}
