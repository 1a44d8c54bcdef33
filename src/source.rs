//! Stream sources: where the bytes served to a receiver come from.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::ring_buffer::RingBuffer;
use crate::{Error, Result};

/// A block of media data answering one read request.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub data: Bytes,
    /// No further data will follow this block.
    pub eof: bool,
}

/// Seekable local file, exclusively owned by its session.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    size: u64,
    position: u64,
}

impl FileSource {
    /// Open `path`, which must exist, be a regular file and be readable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::StreamIo(format!("cannot open {}: {e}", path.display())))?;
        let meta = file
            .metadata()
            .map_err(|e| Error::StreamIo(format!("cannot stat {}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(Error::StreamIo(format!("{} is not a file", path.display())));
        }

        debug!(path = %path.display(), size = meta.len(), "Opened file source");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size: meta.len(),
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read up to `len` bytes; fewer only at end of file.
    fn read_block(&mut self, len: usize) -> Result<Block> {
        let remaining = self.size.saturating_sub(self.position);
        let mut buf = Vec::with_capacity(len.min(usize::try_from(remaining).unwrap_or(usize::MAX)));
        (&mut self.file)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| Error::StreamIo(format!("read from {} failed: {e}", self.path.display())))?;

        self.position += buf.len() as u64;
        let eof = buf.len() < len;
        trace!(requested = len, read = buf.len(), position = self.position, eof, "File read");
        Ok(Block {
            data: Bytes::from(buf),
            eof,
        })
    }

    /// Move to `position`. On failure the position is left unchanged.
    fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.size {
            return Err(Error::StreamIo(format!(
                "seek to {position} beyond end of {} ({} bytes)",
                self.path.display(),
                self.size
            )));
        }
        self.file
            .seek(SeekFrom::Start(position))
            .map_err(|e| Error::StreamIo(format!("seek in {} failed: {e}", self.path.display())))?;
        self.position = position;
        Ok(())
    }
}

/// Read side of a ring buffer fed by an external ingest path.
///
/// Dropping the source resets the ring, so a waiting consumer or producer is
/// released on every teardown path.
pub struct PushSource {
    ring: Arc<RingBuffer>,
    reset_on_drop: bool,
}

impl PushSource {
    pub fn new(ring: Arc<RingBuffer>) -> Self {
        Self {
            ring,
            reset_on_drop: true,
        }
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }
}

impl Drop for PushSource {
    fn drop(&mut self) {
        if self.reset_on_drop {
            self.ring.reset();
        }
    }
}

/// Where the bytes of an active stream come from.
pub enum StreamSource {
    File(FileSource),
    PushBuffer(PushSource),
}

impl StreamSource {
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        FileSource::open(path).map(StreamSource::File)
    }

    pub fn push(ring: Arc<RingBuffer>) -> Self {
        StreamSource::PushBuffer(PushSource::new(ring))
    }

    /// Total length in bytes, if known.
    pub fn size(&self) -> Option<u64> {
        match self {
            StreamSource::File(f) => Some(f.size()),
            StreamSource::PushBuffer(_) => None,
        }
    }

    /// Read the next block of at most `len` bytes.
    ///
    /// For a file the block is final when it comes up short. For a push
    /// buffer a short read may just be a stall; the block is final only once
    /// the ingest path marked the end of the stream and the ring drained.
    pub fn read_block(&mut self, len: usize) -> Result<Block> {
        match self {
            StreamSource::File(f) => f.read_block(len),
            StreamSource::PushBuffer(p) => {
                let data = p.ring.read(len);
                let eof = p.ring.is_finished();
                Ok(Block { data, eof })
            }
        }
    }

    /// Give up a source whose stream never started.
    ///
    /// A push buffer keeps its queued data and its stop handler does not
    /// run, so the same ring can be cast again.
    pub fn abandon(mut self) {
        if let StreamSource::PushBuffer(p) = &mut self {
            p.reset_on_drop = false;
        }
    }

    /// Reposition to byte offset `position`.
    ///
    /// Push buffers carry a live feed with no addressable position; seeking
    /// one fails and leaves the buffered data in place.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        match self {
            StreamSource::File(f) => f.seek(position),
            StreamSource::PushBuffer(_) => Err(Error::StreamIo(
                "push-fed stream cannot seek".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn temp_file(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        (file, data)
    }

    #[test]
    fn open_missing_file_fails() {
        let err = StreamSource::open_file("/definitely/not/here.mp3").err().unwrap();
        assert!(matches!(err, Error::StreamIo(_)));
    }

    #[test]
    fn open_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StreamSource::open_file(dir.path()).is_err());
    }

    #[test]
    fn reads_blocks_and_flags_short_final_block() {
        let (file, data) = temp_file(10);
        let mut source = StreamSource::open_file(file.path()).unwrap();
        assert_eq!(source.size(), Some(10));

        let first = source.read_block(4).unwrap();
        assert_eq!(first.data.as_ref(), &data[..4]);
        assert!(!first.eof);

        source.read_block(4).unwrap();
        let last = source.read_block(4).unwrap();
        assert_eq!(last.data.as_ref(), &data[8..]);
        assert!(last.eof);
    }

    #[test]
    fn seek_then_read_matches_skipping() {
        let (file, data) = temp_file(1000);
        let n = 64;

        for p in [0usize, 1, 250, 999, 1000] {
            let mut source = StreamSource::open_file(file.path()).unwrap();
            source.seek(p as u64).unwrap();
            let block = source.read_block(n).unwrap();
            let end = (p + n).min(data.len());
            assert_eq!(block.data.as_ref(), &data[p..end], "seek to {p}");
        }
    }

    #[test]
    fn failed_seek_keeps_position() {
        let (file, data) = temp_file(100);
        let mut source = FileSource::open(file.path()).unwrap();
        source.read_block(10).unwrap();

        assert!(source.seek(101).is_err());
        assert_eq!(source.position(), 10);
        let block = source.read_block(5).unwrap();
        assert_eq!(block.data.as_ref(), &data[10..15]);
    }

    #[test]
    fn push_source_reports_eof_only_when_drained() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());
        ring.write(Bytes::from_static(b"abcdef")).unwrap();
        ring.set_eof();

        let mut source = StreamSource::push(Arc::clone(&ring));
        let first = source.read_block(4).unwrap();
        assert_eq!(first.data.as_ref(), b"abcd");
        assert!(!first.eof);

        let last = source.read_block(4).unwrap();
        assert_eq!(last.data.as_ref(), b"ef");
        assert!(last.eof);

        assert!(source.seek(0).is_err());
    }

    #[test]
    fn dropping_push_source_resets_ring() {
        let ring = Arc::new(RingBuffer::new(2).unwrap());
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let stops = Arc::clone(&stops);
            ring.set_stop_handler(move || {
                stops.fetch_add(1, Ordering::SeqCst);
            });
        }
        ring.write(Bytes::from_static(b"xyz")).unwrap();

        drop(StreamSource::push(Arc::clone(&ring)));

        assert_eq!(ring.stats().buffered_bytes, 0);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abandoned_push_source_keeps_ring_data() {
        let ring = Arc::new(RingBuffer::new(2).unwrap());
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let stops = Arc::clone(&stops);
            ring.set_stop_handler(move || {
                stops.fetch_add(1, Ordering::SeqCst);
            });
        }
        ring.write(Bytes::from_static(b"xyz")).unwrap();

        StreamSource::push(Arc::clone(&ring)).abandon();

        assert_eq!(ring.stats().buffered_bytes, 3);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn oversized_read_returns_rest_of_file() {
        let (file, data) = temp_file(100);
        let mut source = StreamSource::open_file(file.path()).unwrap();
        source.seek(40).unwrap();

        let block = source.read_block(usize::MAX).unwrap();
        assert_eq!(block.data.as_ref(), &data[40..]);
        assert!(block.eof);
    }
}
