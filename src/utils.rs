//! Utility functions shared across the rewind library
//!
//! File hashing, durable copies, path normalization, and the small
//! grammars used by the purge command (durations and sizes).

use crate::error::{Result, RewindError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

/// Hash a file's content with SHA-256, streaming
///
/// Reads through an 8 KB buffer so large files are never materialized
/// in memory. Returns the hash as a 64-character hex string.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash in-memory data with SHA-256
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Copy `src` to `dst` byte-for-byte and fsync the destination
///
/// The destination descriptor is closed on every exit path. Callers
/// that need cleanup of a partial destination handle it themselves;
/// this function only guarantees that a successful return means the
/// full content is durable on disk.
pub fn copy_file_durable(src: &Path, dst: &Path) -> Result<()> {
    let mut reader = File::open(src)?;
    let mut writer = File::create(dst)?;

    let mut buffer = vec![0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
    }

    writer.sync_all()?;
    Ok(())
}

/// Compute `path` relative to `base` as a forward-slash string
///
/// This is the canonical `file_path` form used by the catalog. Tries a
/// lexical strip first so symlinked roots keep their reported path,
/// falling back to canonicalizing both sides.
pub fn rel_slash(path: &Path, base: &Path) -> Result<String> {
    if let Ok(rel) = path.strip_prefix(base) {
        return Ok(to_slash(rel));
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| to_slash(p))
        .map_err(|_| {
            RewindError::invalid_path(path, format!("not inside project root {:?}", base))
        })
}

/// Render a relative path with forward slashes regardless of platform
pub fn to_slash(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

/// Parse a duration like `30s`, `10m`, `12h`, `7d`, `2w`
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.len() < 2 {
        return Err(RewindError::bad_state(format!(
            "invalid duration {:?} (use e.g. 30s, 10m, 12h, 7d, 2w)",
            s
        )));
    }

    let (value_str, unit) = s.split_at(s.len() - 1);
    let value: u64 = value_str.parse().map_err(|_| {
        RewindError::bad_state(format!("invalid duration value {:?}", value_str))
    })?;

    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        "w" => value * 7 * 86_400,
        other => {
            return Err(RewindError::bad_state(format!(
                "invalid duration unit {:?} (use s, m, h, d, or w)",
                other
            )))
        }
    };

    Ok(Duration::from_secs(secs))
}

/// Parse a size like `512B`, `100KB`, `500MB`, `1GB`, `2TB`
///
/// Units are 1024-based. The numeric part may be fractional
/// (`1.5GB`).
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();

    let (value_str, multiplier) = if let Some(v) = s.strip_suffix("KB") {
        (v, 1024u64)
    } else if let Some(v) = s.strip_suffix("MB") {
        (v, 1024u64.pow(2))
    } else if let Some(v) = s.strip_suffix("GB") {
        (v, 1024u64.pow(3))
    } else if let Some(v) = s.strip_suffix("TB") {
        (v, 1024u64.pow(4))
    } else if let Some(v) = s.strip_suffix('B') {
        (v, 1u64)
    } else {
        return Err(RewindError::bad_state(format!(
            "invalid size {:?} (use B, KB, MB, GB, or TB)",
            s
        )));
    };

    let value: f64 = value_str.trim().parse().map_err(|_| {
        RewindError::bad_state(format!("invalid size value {:?}", value_str))
    })?;
    if value <= 0.0 {
        return Err(RewindError::bad_state(format!(
            "size must be positive: {:?}",
            s
        )));
    }

    Ok((value * multiplier as f64) as u64)
}

/// Format bytes in human-readable form using 1024-based units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_matches_hash_data() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("x.txt");
        fs::write(&path, b"rewind test content").unwrap();

        assert_eq!(hash_file(&path).unwrap(), hash_data(b"rewind test content"));
    }

    #[test]
    fn test_hash_known_value() {
        // sha256("x")
        assert_eq!(
            hash_data(b"x"),
            "2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881"
        );
    }

    #[test]
    fn test_copy_file_durable() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.bin");
        let dst = temp.path().join("dst.bin");
        let payload: Vec<u8> = (0u8..=255).cycle().take(20_000).collect();
        fs::write(&src, &payload).unwrap();

        copy_file_durable(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), payload);
    }

    #[test]
    fn test_rel_slash() {
        let base = Path::new("/home/user/project");
        let path = Path::new("/home/user/project/src/main.rs");
        assert_eq!(rel_slash(path, base).unwrap(), "src/main.rs");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(
            parse_duration("2w").unwrap(),
            Duration::from_secs(2 * 7 * 86_400)
        );
        assert!(parse_duration("7x").is_err());
        assert!(parse_duration("d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512B").unwrap(), 512);
        assert_eq!(parse_size("100KB").unwrap(), 100 * 1024);
        assert_eq!(parse_size("500MB").unwrap(), 500 * 1024 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5KB").unwrap(), 1536);
        assert!(parse_size("10").is_err());
        assert!(parse_size("-1GB").is_err());
        assert!(parse_size("1XB").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
    }
}
