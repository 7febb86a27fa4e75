//! # Disk Spool
//!
//! Optional overflow buffer for artifact payloads. With a queue directory
//! configured, payloads above the threshold are written to disk between
//! download and scan so a run over large artifacts does not hold every
//! buffer in memory. The directory is cache, not state: a spool file that
//! disappears mid-run skips that one item.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Payloads below this stay in memory even when a spool dir is configured.
pub const SPOOL_THRESHOLD: u64 = 8 * 1024 * 1024;

#[derive(Debug)]
pub enum Payload {
    Inline(Vec<u8>),
    Spooled { path: PathBuf, len: u64 },
}

impl Payload {
    /// Wrap downloaded bytes, spooling to disk when a spool dir is present
    /// and the buffer is large. Spool write failure falls back to memory.
    pub fn new(bytes: Vec<u8>, spool: Option<&SpoolDir>) -> Payload {
        let len = bytes.len() as u64;
        if len < SPOOL_THRESHOLD {
            return Payload::Inline(bytes);
        }
        match spool {
            Some(dir) => match dir.write(&bytes) {
                Ok(path) => Payload::Spooled { path, len },
                Err(err) => {
                    debug!("spool write failed ({err}); keeping payload in memory");
                    Payload::Inline(bytes)
                }
            },
            None => Payload::Inline(bytes),
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Payload::Inline(bytes) => bytes.len() as u64,
            Payload::Spooled { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialise the bytes, consuming the payload. Spool files are
    /// removed after a successful read.
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self {
            Payload::Inline(bytes) => Ok(bytes),
            Payload::Spooled { path, .. } => {
                let bytes = std::fs::read(&path)?;
                let _ = std::fs::remove_file(&path);
                Ok(bytes)
            }
        }
    }
}

#[derive(Debug)]
pub struct SpoolDir {
    dir: PathBuf,
    seq: AtomicU64,
}

impl SpoolDir {
    pub fn new(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            seq: AtomicU64::new(0),
        })
    }

    fn write(&self, bytes: &[u8]) -> io::Result<PathBuf> {
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("item_{id:08}.spool"));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn small_payload_stays_inline() {
        let dir = tempdir().expect("tempdir");
        let spool = SpoolDir::new(dir.path()).expect("spool");
        let payload = Payload::new(vec![1, 2, 3], Some(&spool));
        assert!(matches!(payload, Payload::Inline(_)));
        assert_eq!(payload.into_bytes().expect("bytes"), vec![1, 2, 3]);
    }

    #[test]
    fn large_payload_spools_and_reads_back() {
        let dir = tempdir().expect("tempdir");
        let spool = SpoolDir::new(dir.path()).expect("spool");
        let bytes = vec![7u8; SPOOL_THRESHOLD as usize];
        let payload = Payload::new(bytes.clone(), Some(&spool));
        assert!(matches!(payload, Payload::Spooled { .. }));
        assert_eq!(payload.len(), bytes.len() as u64);
        assert_eq!(payload.into_bytes().expect("bytes"), bytes);
        // The spool file is consumed.
        let leftover = std::fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn deleted_spool_file_is_an_io_error() {
        let dir = tempdir().expect("tempdir");
        let spool = SpoolDir::new(dir.path()).expect("spool");
        let payload = Payload::new(vec![7u8; SPOOL_THRESHOLD as usize], Some(&spool));
        if let Payload::Spooled { path, .. } = &payload {
            std::fs::remove_file(path).expect("remove");
        }
        assert!(payload.into_bytes().is_err());
    }

    #[test]
    fn no_spool_dir_keeps_everything_inline() {
        let payload = Payload::new(vec![7u8; SPOOL_THRESHOLD as usize], None);
        assert!(matches!(payload, Payload::Inline(_)));
    }
}
