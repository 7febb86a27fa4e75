//! # File-Type Classifier
//!
//! Magic-byte sniff over the first bytes of a buffer. The orchestrator uses
//! the result to route a work item: archives are expanded, known binary
//! formats are dropped unless their name looks text-likely, and everything
//! else is scanned as text.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;

/// Bytes inspected by [`classify`]. 262 covers every magic number in the
/// table, including the tar `ustar` marker at offset 257.
pub const SNIFF_LEN: usize = 262;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A zip archive the extractor can expand.
    Archive,
    /// A recognised binary format with no text worth scanning.
    KnownBinary,
    /// Anything else; scanned as text.
    Unknown,
}

/// Extensions that are scanned as text even when the magic sniff says
/// binary (a UTF-16 `.env` file trips the sniff, for example).
static TEXT_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "env",
        "yml",
        "yaml",
        "json",
        "txt",
        "log",
        "conf",
        "properties",
    ])
});

struct Magic {
    offset: usize,
    bytes: &'static [u8],
    kind: FileKind,
}

const MAGIC_TABLE: &[Magic] = &[
    // Zip family; the only archive format the extractor expands.
    Magic { offset: 0, bytes: b"PK\x03\x04", kind: FileKind::Archive },
    Magic { offset: 0, bytes: b"PK\x05\x06", kind: FileKind::Archive },
    Magic { offset: 0, bytes: b"PK\x07\x08", kind: FileKind::Archive },
    // Compressed non-archives.
    Magic { offset: 0, bytes: &[0x1F, 0x8B], kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"BZh", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"7z\xBC\xAF\x27\x1C", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"Rar!\x1A\x07", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0x28, 0xB5, 0x2F, 0xFD], kind: FileKind::KnownBinary },
    Magic { offset: 257, bytes: b"ustar", kind: FileKind::KnownBinary },
    // Images.
    Magic { offset: 0, bytes: &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0xFF, 0xD8, 0xFF], kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"GIF8", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"BM", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0x49, 0x49, 0x2A, 0x00], kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0x4D, 0x4D, 0x00, 0x2A], kind: FileKind::KnownBinary },
    Magic { offset: 8, bytes: b"WEBP", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0x00, 0x00, 0x01, 0x00], kind: FileKind::KnownBinary },
    // Documents and executables.
    Magic { offset: 0, bytes: b"%PDF", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0x7F, b'E', b'L', b'F'], kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0xCA, 0xFE, 0xBA, 0xBE], kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"\0asm", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"MZ", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1], kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"SQLite format 3\0", kind: FileKind::KnownBinary },
    // Audio / video.
    Magic { offset: 0, bytes: b"ID3", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"OggS", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"fLaC", kind: FileKind::KnownBinary },
    Magic { offset: 4, bytes: b"ftyp", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: &[0x1A, 0x45, 0xDF, 0xA3], kind: FileKind::KnownBinary },
    Magic { offset: 8, bytes: b"WAVE", kind: FileKind::KnownBinary },
    Magic { offset: 8, bytes: b"AVI ", kind: FileKind::KnownBinary },
    // Fonts.
    Magic { offset: 0, bytes: b"wOFF", kind: FileKind::KnownBinary },
    Magic { offset: 0, bytes: b"wOF2", kind: FileKind::KnownBinary },
];

/// Classify a buffer by its leading bytes. Empty buffers are `Unknown`.
pub fn classify(data: &[u8]) -> FileKind {
    if data.is_empty() {
        return FileKind::Unknown;
    }
    let head = &data[..data.len().min(SNIFF_LEN)];
    for magic in MAGIC_TABLE {
        let end = magic.offset + magic.bytes.len();
        if end <= head.len() && &head[magic.offset..end] == magic.bytes {
            return magic.kind;
        }
    }
    FileKind::Unknown
}

/// Whether a file name carries one of the text-likely extensions that
/// override a `KnownBinary` classification.
pub fn text_likely_name(name: &str) -> bool {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(ext) => TEXT_EXTENSIONS.contains(ext.as_str()),
        // ".env" has no stem-extension split; treat dotfiles named like
        // the allow-list as text too.
        None => {
            let base = Path::new(name)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("");
            base.strip_prefix('.')
                .map(|rest| TEXT_EXTENSIONS.contains(rest))
                .unwrap_or(false)
        }
    }
}

/// Orchestrator policy from §file routing: should this buffer be scanned
/// as text?
pub fn scan_as_text(kind: FileKind, name: &str) -> bool {
    match kind {
        FileKind::Archive => false,
        FileKind::Unknown => true,
        FileKind::KnownBinary => text_likely_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_zip_as_archive() {
        assert_eq!(classify(b"PK\x03\x04rest-of-zip"), FileKind::Archive);
    }

    #[test]
    fn classifies_empty_as_unknown() {
        assert_eq!(classify(b""), FileKind::Unknown);
    }

    #[test]
    fn classifies_png_as_binary() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(classify(&png), FileKind::KnownBinary);
    }

    #[test]
    fn classifies_gzip_as_binary_not_archive() {
        assert_eq!(classify(&[0x1F, 0x8B, 0x08, 0x00]), FileKind::KnownBinary);
    }

    #[test]
    fn classifies_tar_via_offset_magic() {
        let mut tar = vec![0u8; 512];
        tar[257..262].copy_from_slice(b"ustar");
        assert_eq!(classify(&tar), FileKind::KnownBinary);
    }

    #[test]
    fn plain_text_is_unknown() {
        assert_eq!(classify(b"export TOKEN=abc\n"), FileKind::Unknown);
    }

    #[test]
    fn text_extension_overrides_binary() {
        assert!(scan_as_text(FileKind::KnownBinary, "settings.json"));
        assert!(scan_as_text(FileKind::KnownBinary, ".env"));
        assert!(!scan_as_text(FileKind::KnownBinary, "photo.png"));
    }

    #[test]
    fn unknown_is_always_text() {
        assert!(scan_as_text(FileKind::Unknown, "whatever.bin"));
    }

    #[test]
    fn archive_is_never_text() {
        assert!(!scan_as_text(FileKind::Archive, "bundle.zip"));
    }
}
