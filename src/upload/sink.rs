//! Durable local chunk spool
//!
//! Every chunk is appended to a length-prefixed spool file before it is
//! handed to the upload channel, so an upload failure or a crash never
//! loses captured media. The spool is discarded once the recording is
//! committed remotely.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct ChunkSink {
    path: PathBuf,
    file: Mutex<File>,
    bytes_written: AtomicU64,
    chunks_written: AtomicU64,
}

impl ChunkSink {
    /// Create a spool file named after the track under `dir`.
    pub fn create(dir: &Path, label: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{label}.spool"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        tracing::debug!("chunk spool opened at {:?}", path);

        Ok(Self {
            path,
            file: Mutex::new(file),
            bytes_written: AtomicU64::new(0),
            chunks_written: AtomicU64::new(0),
        })
    }

    /// Append one chunk, in arrival order. Flushed per chunk so a crash
    /// loses at most the chunk being written.
    pub fn append(&self, chunk: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock();
        file.write_all(&(chunk.len() as u32).to_le_bytes())?;
        file.write_all(chunk)?;
        file.flush()?;

        self.bytes_written
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written.load(Ordering::Relaxed)
    }

    /// Enumerate the chunks in a spool file.
    ///
    /// A truncated trailing record (interrupted write) ends the read
    /// rather than failing it.
    pub fn read_back(path: &Path) -> io::Result<Vec<Vec<u8>>> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        let mut chunks = Vec::new();
        let mut pos = 0usize;
        while pos + 4 <= data.len() {
            let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
                as usize;
            pos += 4;
            if pos + len > data.len() {
                tracing::warn!("spool {:?} ends in a truncated chunk, dropping it", path);
                break;
            }
            chunks.push(data[pos..pos + len].to_vec());
            pos += len;
        }
        Ok(chunks)
    }

    /// Remove the spool once its upload has been committed or the
    /// recording dismissed.
    pub fn discard(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}
