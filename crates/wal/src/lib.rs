//! Write-ahead log: undo records for the single in-progress transaction.
//!
//! The log lives in its own file beside the database. While a transaction is
//! in progress the file holds a small header (`u8` valid flag, `u64`
//! transaction id) followed by one undo record per page the transaction has
//! dirtied: `u32` length, `u32` page number, `u64` transaction id, then the
//! 4096-byte pre-image of the page. Truncation to zero bytes is the commit
//! switch point and denotes "no transaction in progress".
//!
//! The write-ahead property is enforced by the page cache: it appends (and
//! fences) a page's pre-image here before the first mutation, so the undo
//! record is always durable before the new image can reach the data file.
//! Abort and recovery walk the records in reverse and restore the images.

#[cfg(test)]
mod tests;

use common::{DbError, DbResult, PageId, TxnId};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use storage::{PAGE_SIZE, PageBuf};

const WAL_HEADER_BYTES: usize = 1 + 8;
const RECORD_BODY_BYTES: usize = 4 + 8 + PAGE_SIZE;

/// One undo entry: the pre-image of a page as it was on disk before the
/// owning transaction first dirtied it.
#[derive(Clone, Debug)]
pub struct UndoRecord {
    pub page: PageId,
    pub txn_id: TxnId,
    pub image: Box<PageBuf>,
}

/// Append-only undo log for one transaction at a time.
#[derive(Debug)]
pub struct Wal {
    file: File,
    in_progress: Option<TxnId>,
}

impl Wal {
    /// Open or create the log file. A non-empty file with its valid flag set
    /// means a transaction was in progress when the process died; the caller
    /// is expected to run recovery before doing anything else.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        let len = file.metadata()?.len();
        let in_progress = if len >= WAL_HEADER_BYTES as u64 {
            let mut header = [0u8; WAL_HEADER_BYTES];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header)?;
            if header[0] != 0 {
                Some(u64::from_le_bytes(header[1..9].try_into().unwrap()))
            } else {
                None
            }
        } else {
            // Empty, or a begin marker torn by a crash before its fence
            // completed; either way nothing was allowed to touch the data
            // file, so the log is idle.
            None
        };

        Ok(Self { file, in_progress })
    }

    /// The id of the in-progress transaction, if any.
    pub fn in_progress(&self) -> Option<TxnId> {
        self.in_progress
    }

    pub fn is_idle(&self) -> bool {
        self.in_progress.is_none()
    }

    /// Write the begin marker for a new transaction and fence it.
    pub fn begin(&mut self, txn_id: TxnId) -> DbResult<()> {
        if let Some(active) = self.in_progress {
            return Err(DbError::Resource(format!(
                "transaction {active} already in progress"
            )));
        }

        // Discard any stale bytes from a torn previous header.
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; WAL_HEADER_BYTES];
        header[0] = 1;
        header[1..9].copy_from_slice(&txn_id.to_le_bytes());
        self.file.write_all(&header)?;
        self.file.sync_all()?;

        self.in_progress = Some(txn_id);
        Ok(())
    }

    /// Append one undo record and fence it to durable storage.
    ///
    /// Returns an error if no transaction is in progress or the record
    /// belongs to a different transaction.
    pub fn append_undo(&mut self, page: PageId, image: &PageBuf, txn_id: TxnId) -> DbResult<()> {
        match self.in_progress {
            Some(active) if active == txn_id => {}
            Some(active) => {
                return Err(DbError::Resource(format!(
                    "undo record for transaction {txn_id} while {active} is in progress"
                )));
            }
            None => {
                return Err(DbError::Resource(
                    "undo record appended outside a transaction".into(),
                ));
            }
        }

        self.file.seek(SeekFrom::End(0))?;
        self.file
            .write_all(&(RECORD_BODY_BYTES as u32).to_le_bytes())?;
        self.file.write_all(&page.0.to_le_bytes())?;
        self.file.write_all(&txn_id.to_le_bytes())?;
        self.file.write_all(image.as_slice())?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Read every complete undo record, in append order. The caller applies
    /// them in reverse.
    ///
    /// A torn record at the tail is ignored: its fence never completed, so
    /// the write-ahead rule guarantees the corresponding page was never
    /// written back.
    pub fn undo_records(&mut self) -> DbResult<Vec<UndoRecord>> {
        let mut records = Vec::new();
        if self.file.metadata()?.len() < WAL_HEADER_BYTES as u64 {
            return Ok(records);
        }

        self.file.seek(SeekFrom::Start(WAL_HEADER_BYTES as u64))?;
        loop {
            let mut len_buf = [0u8; 4];
            match self.file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len != RECORD_BODY_BYTES {
                return Err(DbError::Corruption(format!(
                    "undo record length {len}, expected {RECORD_BODY_BYTES}"
                )));
            }

            let mut head = [0u8; 12];
            let mut image = Box::new([0u8; PAGE_SIZE]);
            let read = self
                .file
                .read_exact(&mut head)
                .and_then(|_| self.file.read_exact(image.as_mut_slice()));
            match read {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            records.push(UndoRecord {
                page: PageId(u32::from_le_bytes(head[0..4].try_into().unwrap())),
                txn_id: u64::from_le_bytes(head[4..12].try_into().unwrap()),
                image,
            });
        }

        Ok(records)
    }

    /// Truncate the log to zero bytes. This is the atomic switch point: once
    /// it completes, the transaction's effects are the durable state.
    pub fn clear(&mut self) -> DbResult<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.in_progress = None;
        Ok(())
    }
}
