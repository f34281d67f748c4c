//! On-disk file store.
//!
//! The receive side appends DATA payloads to lazily-opened streams keyed
//! by filename, truncating any previous file of the same name, and closes
//! a stream when the last fragment arrives. The send side hands out a
//! chunked reader yielding `(payload, more_fragments)` pairs of at most
//! MSS bytes. File I/O is synchronous; chunks are small enough that this
//! never stalls a session for long.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use log::debug;

use crate::config::MSS;
use crate::error::{Error, Result};

/// Server-side storage directory with per-filename append streams.
pub struct FileStore {
    root: PathBuf,
    open: HashMap<String, File>,
}

impl FileStore {
    /// Opens (creating if needed) the storage directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            open: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rejects anything that is not a plain file name, so a request can
    /// never escape the storage directory.
    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let path = Path::new(filename);
        let mut components = path.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == filename => {
                Ok(self.root.join(name))
            }
            _ => Err(Error::InvalidFilename(filename.to_string())),
        }
    }

    /// Checks that `filename` is acceptable as a store entry without
    /// touching the filesystem.
    pub fn validate_name(&self, filename: &str) -> Result<()> {
        self.resolve(filename).map(|_| ())
    }

    /// True when `filename` already exists in the store.
    pub fn contains(&self, filename: &str) -> bool {
        self.resolve(filename)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Size in bytes of a stored file.
    pub fn size_of(&self, filename: &str) -> Result<u64> {
        let path = self.resolve(filename)?;
        let meta = fs::metadata(&path)
            .map_err(|_| Error::FileNotFound(filename.to_string()))?;
        Ok(meta.len())
    }

    /// Appends one in-order DATA payload.
    ///
    /// The first chunk for a filename opens the file for write, truncating
    /// prior content; `more_fragments == false` closes the stream.
    pub fn save_chunk(&mut self, filename: &str, payload: &[u8], more_fragments: bool) -> Result<()> {
        let path = self.resolve(filename)?;
        let file = match self.open.entry(filename.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(File::create(&path)?),
        };
        file.write_all(payload)?;

        if !more_fragments {
            debug!("file '{filename}' stored completely");
            self.close(filename)?;
        }
        Ok(())
    }

    /// Flushes and drops the append stream for `filename`, if any.
    pub fn close(&mut self, filename: &str) -> Result<()> {
        if let Some(mut file) = self.open.remove(filename) {
            file.flush()?;
        }
        Ok(())
    }

    /// Opens a stored file for chunked sending.
    pub fn reader(&self, filename: &str) -> Result<ChunkReader> {
        let path = self.resolve(filename)?;
        if !path.is_file() {
            return Err(Error::FileNotFound(filename.to_string()));
        }
        ChunkReader::open(&path)
    }
}

/// Lazy chunked reader over a file, yielding at most MSS bytes per chunk
/// together with a flag telling whether further bytes remain.
pub struct ChunkReader {
    file: File,
    remaining: u64,
    yielded: bool,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let remaining = file.metadata()?.len();
        Ok(Self {
            file,
            remaining,
            yielded: false,
        })
    }

    /// Total bytes left to yield.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Reads the next chunk. Returns `None` once the file is exhausted.
    ///
    /// An empty file yields a single empty chunk so the receiver still
    /// observes a last-fragment frame.
    pub fn next_chunk(&mut self) -> Result<Option<(Vec<u8>, bool)>> {
        if self.remaining == 0 {
            if self.yielded {
                return Ok(None);
            }
            self.yielded = true;
            return Ok(Some((Vec::new(), false)));
        }
        self.yielded = true;
        let take = (self.remaining as usize).min(MSS);
        let mut chunk = vec![0u8; take];
        self.file.read_exact(&mut chunk)?;
        self.remaining -= take as u64;
        Ok(Some((chunk, self.remaining > 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_chunks_and_read_back() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        store.save_chunk("out.bin", b"hello ", true).unwrap();
        store.save_chunk("out.bin", b"world", false).unwrap();

        assert!(store.contains("out.bin"));
        assert_eq!(store.size_of("out.bin").unwrap(), 11);
        assert_eq!(fs::read(dir.path().join("out.bin")).unwrap(), b"hello world");
    }

    #[test]
    fn test_first_chunk_truncates_previous_content() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), b"old old old content").unwrap();

        let mut store = FileStore::open(dir.path()).unwrap();
        store.save_chunk("f.txt", b"new", false).unwrap();

        assert_eq!(fs::read(dir.path().join("f.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_reader_chunking_and_mf_flag() {
        let dir = tempdir().unwrap();
        let content = vec![0x5A; MSS * 2 + 100];
        fs::write(dir.path().join("big.bin"), &content).unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        let mut reader = store.reader("big.bin").unwrap();

        let (c1, mf1) = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c1.len(), MSS);
        assert!(mf1);

        let (c2, mf2) = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c2.len(), MSS);
        assert!(mf2);

        let (c3, mf3) = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c3.len(), 100);
        assert!(!mf3);

        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_empty_file_yields_one_last_fragment() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("empty"), b"").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        let mut reader = store.reader("empty").unwrap();

        let (chunk, mf) = reader.next_chunk().unwrap().unwrap();
        assert!(chunk.is_empty());
        assert!(!mf);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.reader("nope.txt"),
            Err(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.reader("../etc/passwd"),
            Err(Error::InvalidFilename(_))
        ));
        assert!(!store.contains("a/b.txt"));
    }
}
