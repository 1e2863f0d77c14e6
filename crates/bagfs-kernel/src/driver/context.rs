//! Per-handle state owned by the OS host.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// An open backing file.
///
/// Positioned I/O holds the mutex across seek and transfer, so overlapped
/// requests on one handle never interleave.
#[derive(Debug, Clone)]
pub struct OpenFile {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl OpenFile {
    pub fn new(path: PathBuf, file: File) -> Self {
        Self {
            path,
            file: Arc::new(Mutex::new(file)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `buf.len()` bytes at `offset`; short only at end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    pub fn flush(&self) -> io::Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_data()
    }

    pub fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.lock().set_len(len)
    }
}

/// Opaque slot the host keeps for each open handle.
#[derive(Debug, Default)]
pub struct FileContext {
    open: Mutex<Option<OpenFile>>,
    is_directory: AtomicBool,
    delete_on_close: AtomicBool,
}

impl FileContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, file: OpenFile) {
        *self.open.lock() = Some(file);
    }

    /// The open file, if any. Cloning releases the slot lock before I/O.
    pub fn get(&self) -> Option<OpenFile> {
        self.open.lock().clone()
    }

    pub fn clear(&self) -> Option<OpenFile> {
        self.open.lock().take()
    }

    pub fn is_open(&self) -> bool {
        self.open.lock().is_some()
    }

    pub fn set_directory(&self, value: bool) {
        self.is_directory.store(value, Ordering::SeqCst);
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory.load(Ordering::SeqCst)
    }

    pub fn set_delete_on_close(&self, value: bool) {
        self.delete_on_close.store(value, Ordering::SeqCst);
    }

    pub fn delete_on_close(&self) -> bool {
        self.delete_on_close.load(Ordering::SeqCst)
    }
}
