//! DH-005: Streaming gzip archive sink with BLAKE3 digest and atomic publish.
//!
//! Bytes written are compressed incrementally; nothing beyond the encoder's
//! window and a write buffer is held in memory. With atomic publish the data
//! goes to `<archive>.partial` and is renamed into place by `finish`.

use super::error::RecipeError;
use super::types::partial_path;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const WRITE_BUF_SIZE: usize = 65536;

/// Counts and hashes everything written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
    poisoned: bool,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
            poisoned: false,
        }
    }

    /// Refuse every later write and flush.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// `"blake3:{hex}"` of the bytes written so far.
    pub fn digest(&self) -> String {
        format!("blake3:{}", self.hasher.finalize().to_hex())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.poisoned {
            return Err(abandoned());
        }
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Err(abandoned());
        }
        self.inner.flush()
    }
}

fn abandoned() -> io::Error {
    io::Error::other("archive abandoned")
}

/// Size and digest of a finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub compressed_bytes: u64,
    pub digest: String,
}

/// An archive being written.
pub struct ArchiveWriter {
    encoder: Option<GzEncoder<HashingWriter<BufWriter<File>>>>,
    target: PathBuf,
    write_path: PathBuf,
    atomic: bool,
}

impl ArchiveWriter {
    /// Create the archive (or its partial file). Never overwrites.
    pub fn create(target: &Path, level: u32, atomic: bool) -> Result<Self, RecipeError> {
        let write_path = if atomic {
            partial_path(target)
        } else {
            target.to_path_buf()
        };
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&write_path)
            .map_err(|e| RecipeError::io(format!("cannot create {}", write_path.display()), e))?;

        let sink = HashingWriter::new(BufWriter::with_capacity(WRITE_BUF_SIZE, file));
        Ok(Self {
            encoder: Some(GzEncoder::new(sink, Compression::new(level.min(9)))),
            target: target.to_path_buf(),
            write_path,
            atomic,
        })
    }

    /// Path currently being written.
    pub fn write_path(&self) -> &Path {
        &self.write_path
    }

    /// Compress and write all of `bytes`.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), RecipeError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| RecipeError::Runtime("archive already closed".to_string()))?;
        encoder
            .write_all(bytes)
            .map_err(|e| RecipeError::io(format!("write error {}", self.write_path.display()), e))
    }

    /// Terminate the gzip stream, sync it to disk, and publish it.
    pub fn finish(mut self) -> Result<ArchiveSummary, RecipeError> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| RecipeError::Runtime("archive already closed".to_string()))?;
        let result = self.finalize(encoder);
        if result.is_err() {
            self.discard();
        }
        result
    }

    fn finalize(
        &self,
        encoder: GzEncoder<HashingWriter<BufWriter<File>>>,
    ) -> Result<ArchiveSummary, RecipeError> {
        let ctx = |what: &str| format!("{} {}", what, self.write_path.display());

        let mut sink = encoder.finish().map_err(|e| RecipeError::io(ctx("finalize"), e))?;
        sink.flush().map_err(|e| RecipeError::io(ctx("flush"), e))?;
        let compressed_bytes = sink.written();
        let digest = sink.digest();
        let file = sink
            .into_inner()
            .into_inner()
            .map_err(|e| RecipeError::io(ctx("flush"), e.into_error()))?;
        file.sync_all().map_err(|e| RecipeError::io(ctx("sync"), e))?;
        drop(file);

        if self.atomic {
            if self.target.symlink_metadata().is_ok() {
                return Err(RecipeError::Runtime(format!(
                    "{} appeared while the backup was running, not overwriting it",
                    self.target.display()
                )));
            }
            std::fs::rename(&self.write_path, &self.target).map_err(|e| {
                RecipeError::io(
                    format!(
                        "cannot rename {} -> {}",
                        self.write_path.display(),
                        self.target.display()
                    ),
                    e,
                )
            })?;
        }

        Ok(ArchiveSummary {
            path: self.target.clone(),
            compressed_bytes,
            digest,
        })
    }

    /// Give up on the archive. The partial file is removed under atomic
    /// publish; otherwise the truncated archive stays where it is, without
    /// a gzip trailer, so it never decodes as a complete dump.
    pub fn abort(mut self) {
        self.close_truncated();
        self.discard();
    }

    /// Drop the encoder without letting it terminate the gzip stream.
    fn close_truncated(&mut self) -> bool {
        match self.encoder.take() {
            Some(mut encoder) => {
                encoder.get_mut().poison();
                true
            }
            None => false,
        }
    }

    fn discard(&mut self) {
        if self.atomic && self.write_path.exists() {
            let _ = std::fs::remove_file(&self.write_path);
        }
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        // Unfinished: never leave a file that decodes as a whole archive.
        if self.close_truncated() {
            self.discard();
        }
    }
}
