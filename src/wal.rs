use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

pub type Lsn = u32;
pub const INVALID_LSN: Lsn = 0;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Write-ahead log manager.
///
/// Records are buffered in memory with monotonically increasing LSNs and
/// forced to disk by `flush`. The buffer pool forces the log up to a page's
/// recorded LSN before that page is written back, so no page referencing an
/// unlogged change ever reaches the store.
pub struct LogManager {
    file: Mutex<File>,
    buffer: Mutex<VecDeque<(Lsn, Box<[u8]>)>>,
    next_lsn: AtomicU32,
    persistent_lsn: AtomicU32,
}

impl LogManager {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(WalError::Io)?;

        Ok(Self {
            file: Mutex::new(file),
            buffer: Mutex::new(VecDeque::new()),
            next_lsn: AtomicU32::new(INVALID_LSN + 1),
            persistent_lsn: AtomicU32::new(INVALID_LSN),
        })
    }

    /// Appends a record to the in-memory log buffer and returns its LSN.
    pub fn append(&self, record: &[u8]) -> Lsn {
        let mut buffer = self.buffer.lock().unwrap();
        let lsn = self.next_lsn.fetch_add(1, Ordering::Relaxed);
        buffer.push_back((lsn, record.into()));
        lsn
    }

    /// Highest LSN known durable.
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::Acquire)
    }

    /// Forces every buffered record with an LSN up to `lsn` to disk.
    ///
    /// Records are framed as `lsn (4B LE) | len (4B LE) | payload`.
    pub fn flush(&self, lsn: Lsn) -> Result<(), WalError> {
        if lsn == INVALID_LSN || self.persistent_lsn() >= lsn {
            return Ok(());
        }

        let mut buffer = self.buffer.lock().unwrap();
        let mut file = self.file.lock().unwrap();
        let mut flushed = self.persistent_lsn();
        while let Some((record_lsn, record)) = buffer.front() {
            if *record_lsn > lsn {
                break;
            }
            file.write_all(&record_lsn.to_le_bytes())?;
            file.write_all(&(record.len() as u32).to_le_bytes())?;
            file.write_all(record)?;
            flushed = *record_lsn;
            buffer.pop_front();
        }
        file.sync_all()?;
        self.persistent_lsn.store(flushed.max(lsn), Ordering::Release);
        Ok(())
    }
}
