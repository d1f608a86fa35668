use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        SourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Read-only access to a raw dump.
///
/// Extraction only ever moves forward, but it may restart from the top when
/// an encoding attempt is abandoned, so `open_stream` can be called more than
/// once.
pub trait DumpSource: Send + Sync {
    fn len(&self) -> u64;
    fn name(&self) -> &str;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError>;
    fn open_stream(&self) -> Result<Box<dyn BufRead + Send>, SourceError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dump file on disk: path plus size captured at open time.
pub struct RawSource {
    path: PathBuf,
    name: String,
    file: File,
    len: u64,
    #[cfg(not(unix))]
    lock: std::sync::Mutex<()>,
}

impl RawSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|e| SourceError::io(path, e))?;
        let len = file.metadata().map_err(|e| SourceError::io(path, e))?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            file,
            len,
            #[cfg(not(unix))]
            lock: std::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DumpSource for RawSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file
                .read_at(buf, offset)
                .map_err(|e| SourceError::io(&self.path, e))
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self
                .lock
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut f = &self.file;
            f.seek(SeekFrom::Start(offset))
                .map_err(|e| SourceError::io(&self.path, e))?;
            f.read(buf).map_err(|e| SourceError::io(&self.path, e))
        }
    }

    fn open_stream(&self) -> Result<Box<dyn BufRead + Send>, SourceError> {
        let file = File::open(&self.path).map_err(|e| SourceError::io(&self.path, e))?;
        Ok(Box::new(BufReader::with_capacity(256 * 1024, file)))
    }
}

/// Read up to `limit` bytes from the start of the source, capped to its size.
pub fn read_prefix(source: &dyn DumpSource, limit: u64) -> Result<Vec<u8>, SourceError> {
    let len = source.len().min(limit) as usize;
    let mut buf = vec![0u8; len];
    let mut read = 0usize;
    while read < buf.len() {
        let n = source.read_at(read as u64, &mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    buf.truncate(read);
    Ok(buf)
}
