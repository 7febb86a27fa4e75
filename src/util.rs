//! # Utility Module
//!
//! Small shared helpers: human-readable size parsing and output path checks.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Result, anyhow};

/// Parse a human-readable size string such as `512`, `100Kb`, `50Mb`,
/// `1GiB`. Decimal suffixes use powers of 1000, binary suffixes powers of
/// 1024. Case-insensitive.
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("empty size string"));
    }

    let lower = trimmed.to_ascii_lowercase();
    let split = lower
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(lower.len());
    let (num_part, suffix) = lower.split_at(split);
    if num_part.is_empty() {
        return Err(anyhow!("invalid size string: {input}"));
    }

    let value: f64 = num_part
        .parse()
        .map_err(|_| anyhow!("invalid size string: {input}"))?;

    let multiplier: u64 = match suffix.trim() {
        "" | "b" => 1,
        "kb" | "k" => 1_000,
        "mb" | "m" => 1_000_000,
        "gb" | "g" => 1_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        other => return Err(anyhow!("unknown size suffix {other:?} in {input}")),
    };

    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 {
        return Err(anyhow!("size out of range: {input}"));
    }
    Ok(bytes.round() as u64)
}

/// Ensure a directory exists and is writable.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(anyhow!("path is not a directory: {}", path.display()));
        }
    } else {
        std::fs::create_dir_all(path)?;
    }

    let probe_path = path.join(".leakhound_write_probe");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe_path);
            Ok(())
        }
        Err(err) => Err(anyhow!(
            "directory is not writable: {} ({})",
            path.display(),
            err
        )),
    }
}

/// One printable line of context around a match, for the finding report.
pub fn context_line(data: &[u8], start: usize, end: usize, max_len: usize) -> String {
    let line_start = data[..start]
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    let line_end = data[end..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| end + p)
        .unwrap_or(data.len());

    let mut line = String::from_utf8_lossy(&data[line_start..line_end])
        .trim()
        .to_string();
    if line.len() > max_len {
        let mut cut = max_len;
        while cut > 0 && !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
        line.push('…');
    }
    line
}

#[cfg(test)]
mod tests {
    use super::{context_line, ensure_dir, parse_size};
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn parses_plain_bytes() {
        assert_eq!(parse_size("512").expect("parse"), 512);
        assert_eq!(parse_size("0").expect("parse"), 0);
    }

    #[test]
    fn parses_decimal_suffixes() {
        assert_eq!(parse_size("50Mb").expect("parse"), 50_000_000);
        assert_eq!(parse_size("100kb").expect("parse"), 100_000);
        assert_eq!(parse_size("2GB").expect("parse"), 2_000_000_000);
    }

    #[test]
    fn parses_binary_suffixes() {
        assert_eq!(parse_size("1MiB").expect("parse"), 1 << 20);
        assert_eq!(parse_size("4KiB").expect("parse"), 4096);
    }

    #[test]
    fn parses_fractional_values() {
        assert_eq!(parse_size("1.5Mb").expect("parse"), 1_500_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("Mb").is_err());
        assert!(parse_size("10Xb").is_err());
    }

    #[test]
    fn ensures_dir_is_writable() {
        let dir = tempdir().expect("tempdir");
        ensure_dir(dir.path()).expect("ensure dir");
    }

    #[test]
    fn rejects_path_that_is_file() {
        let dir = tempdir().expect("tempdir");
        let file_path = dir.path().join("out.txt");
        let _ = File::create(&file_path).expect("create file");
        let err = ensure_dir(&file_path).expect_err("should fail");
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn context_extracts_single_line() {
        let data = b"first line\nexport TOKEN=abc123\nlast line";
        let start = 17usize;
        let line = context_line(data, start, start + 9, 120);
        assert_eq!(line, "export TOKEN=abc123");
    }
}
