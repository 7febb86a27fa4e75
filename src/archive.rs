//! # Archive Extractor
//!
//! Expands zip bytes fully in memory and hands back the entries worth
//! scanning. Nested archives are expanded recursively up to a depth cap;
//! entries advertising an uncompressed size above the artifact cap are
//! rejected before decompression. Nothing is ever written to disk, so
//! zip-slip paths are harmless and entry names are kept verbatim.

use std::io::{Cursor, Read};

use tracing::debug;

use crate::classify::{self, FileKind};

pub const DEFAULT_MAX_DEPTH: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    /// Cap on any single entry's advertised uncompressed size.
    pub max_file_size: u64,
    /// How many levels of archive-in-archive to follow.
    pub max_depth: u32,
}

#[derive(Debug)]
pub struct ExtractedFile {
    /// Entry path, with nested archives joined in: `inner.zip/secret.txt`.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Result of one archive expansion. Per-entry failures land in `errors`
/// while extraction continues; `partial` callers can flag the archive.
#[derive(Debug, Default)]
pub struct ArchiveScan {
    pub files: Vec<ExtractedFile>,
    pub errors: Vec<String>,
    pub skipped_oversize: u64,
    pub skipped_depth: u64,
    pub skipped_binary: u64,
}

impl ArchiveScan {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Expand zip bytes starting at `depth` (0 for a top-level artifact).
pub fn extract_zip(bytes: &[u8], limits: &ExtractLimits, depth: u32) -> ArchiveScan {
    let mut scan = ArchiveScan::default();
    extract_into(bytes, limits, depth, "", &mut scan);
    scan
}

fn extract_into(
    bytes: &[u8],
    limits: &ExtractLimits,
    depth: u32,
    prefix: &str,
    scan: &mut ArchiveScan,
) {
    let mut archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(err) => {
            scan.errors.push(format!("{prefix}: unreadable archive: {err}"));
            return;
        }
    };

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(err) => {
                scan.errors
                    .push(format!("{prefix}entry {index}: unreadable metadata: {err}"));
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let name = join_entry_name(prefix, entry.name());
        let advertised = entry.size();
        if advertised > limits.max_file_size {
            debug!(
                "skipping {name}: advertised size {advertised} exceeds cap {}",
                limits.max_file_size
            );
            scan.skipped_oversize += 1;
            continue;
        }

        let mut data = Vec::with_capacity(advertised as usize);
        if let Err(err) = entry.read_to_end(&mut data) {
            scan.errors.push(format!("{name}: corrupt entry: {err}"));
            continue;
        }

        match classify::classify(&data) {
            FileKind::Archive => {
                if depth + 1 > limits.max_depth {
                    debug!("skipping nested archive {name}: depth cap {}", limits.max_depth);
                    scan.skipped_depth += 1;
                    continue;
                }
                let nested_prefix = format!("{name}/");
                extract_into(&data, limits, depth + 1, &nested_prefix, scan);
            }
            kind => {
                if classify::scan_as_text(kind, &name) {
                    scan.files.push(ExtractedFile { name, bytes: data });
                } else {
                    scan.skipped_binary += 1;
                }
            }
        }
    }
}

fn join_entry_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in files {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start file");
            writer.write_all(bytes).expect("write entry");
        }
        writer.finish().expect("finish").into_inner()
    }

    fn limits() -> ExtractLimits {
        ExtractLimits {
            max_file_size: 10 * 1024 * 1024,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    #[test]
    fn extracts_text_entries() {
        let bytes = zip_of(&[("notes.txt", b"hello"), ("config/.env", b"TOKEN=x")]);
        let scan = extract_zip(&bytes, &limits(), 0);
        assert!(!scan.is_partial());
        let names: Vec<&str> = scan.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["notes.txt", "config/.env"]);
    }

    #[test]
    fn recurses_into_nested_archive_with_joined_names() {
        let inner = zip_of(&[("secret.txt", b"API_TOKEN=sk_test_abc")]);
        let outer = zip_of(&[("inner.zip", &inner), ("top.log", b"build ok")]);
        let scan = extract_zip(&outer, &limits(), 0);
        let names: Vec<&str> = scan.files.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"inner.zip/secret.txt"));
        assert!(names.contains(&"top.log"));
    }

    #[test]
    fn depth_cap_skips_deep_nesting() {
        let level3 = zip_of(&[("deep.txt", b"x")]);
        let level2 = zip_of(&[("l3.zip", &level3)]);
        let level1 = zip_of(&[("l2.zip", &level2)]);
        let outer = zip_of(&[("l1.zip", &level1)]);

        let tight = ExtractLimits {
            max_file_size: 10 * 1024 * 1024,
            max_depth: 2,
        };
        let scan = extract_zip(&outer, &tight, 0);
        assert!(scan.files.is_empty());
        assert_eq!(scan.skipped_depth, 1);

        let scan = extract_zip(&outer, &limits(), 0);
        assert_eq!(scan.files.len(), 1);
        assert_eq!(scan.files[0].name, "l1.zip/l2.zip/l3.zip/deep.txt");
    }

    #[test]
    fn oversize_entry_is_rejected_before_read() {
        let big = vec![b'a'; 4096];
        let bytes = zip_of(&[("big.txt", &big), ("small.txt", b"ok")]);
        let tight = ExtractLimits {
            max_file_size: 1024,
            max_depth: DEFAULT_MAX_DEPTH,
        };
        let scan = extract_zip(&bytes, &tight, 0);
        assert_eq!(scan.skipped_oversize, 1);
        assert_eq!(scan.files.len(), 1);
        assert_eq!(scan.files[0].name, "small.txt");
    }

    #[test]
    fn binary_entries_are_dropped() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let bytes = zip_of(&[("logo.png", &png), ("readme.txt", b"hi")]);
        let scan = extract_zip(&bytes, &limits(), 0);
        assert_eq!(scan.skipped_binary, 1);
        assert_eq!(scan.files.len(), 1);
    }

    #[test]
    fn garbage_bytes_report_archive_error() {
        let scan = extract_zip(b"this is not a zip", &limits(), 0);
        assert!(scan.is_partial());
        assert!(scan.files.is_empty());
    }
}
