//! Single-file pager: fixed-size page I/O over one database file.
//!
//! The file is an array of 4096-byte pages addressed by 1-based page number.
//! Page 1 is the database header and is owned by this crate; pages 2..N hold
//! tree nodes, row payloads, and schema records and are only ever touched
//! through the page cache. The header is the recovery anchor: it is rewritten
//! and fenced every time one of its fields changes.


pub mod codec;

use common::{DbError, DbResult, PageId, TxnId};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 4096;

/// A full page image.
pub type PageBuf = [u8; PAGE_SIZE];

/// Reserved prefix of row and schema pages, kept zero.
pub const ROW_HEADER_BYTES: usize = 12;

const MAGIC: [u8; 4] = *b"msql";
const FORMAT_VERSION: u32 = 1;

/// In-memory copy of the database header (page 1).
///
/// Field offsets are fixed: magic, version, page size, high-water page
/// number, catalog root, auxiliary root, WAL-valid flag, last committed
/// transaction id, zero padding to the end of the page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DbHeader {
    pub version: u32,
    pub page_high_water: u32,
    pub catalog_root: PageId,
    pub aux_root: PageId,
    pub wal_valid: bool,
    pub last_txn_id: TxnId,
}

impl DbHeader {
    fn fresh() -> Self {
        Self {
            version: FORMAT_VERSION,
            page_high_water: 1,
            catalog_root: PageId::NONE,
            aux_root: PageId::NONE,
            wal_valid: false,
            last_txn_id: 0,
        }
    }

    pub fn encode(&self, buf: &mut PageBuf) {
        buf.fill(0);
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&self.page_high_water.to_le_bytes());
        buf[16..20].copy_from_slice(&self.catalog_root.0.to_le_bytes());
        buf[20..24].copy_from_slice(&self.aux_root.0.to_le_bytes());
        buf[24] = self.wal_valid as u8;
        buf[25..33].copy_from_slice(&self.last_txn_id.to_le_bytes());
    }

    pub fn decode(buf: &PageBuf) -> DbResult<Self> {
        if buf[0..4] != MAGIC {
            return Err(DbError::Corruption("bad magic in database header".into()));
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(DbError::Corruption(format!(
                "unsupported format version {version}"
            )));
        }
        let page_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if page_size != PAGE_SIZE as u32 {
            return Err(DbError::Corruption(format!(
                "page size mismatch: file has {page_size}, engine expects {PAGE_SIZE}"
            )));
        }
        let page_high_water = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        if page_high_water == 0 {
            return Err(DbError::Corruption("header high-water mark is zero".into()));
        }
        Ok(Self {
            version,
            page_high_water,
            catalog_root: PageId(u32::from_le_bytes(buf[16..20].try_into().unwrap())),
            aux_root: PageId(u32::from_le_bytes(buf[20..24].try_into().unwrap())),
            wal_valid: buf[24] != 0,
            last_txn_id: u64::from_le_bytes(buf[25..33].try_into().unwrap()),
        })
    }
}

/// Owns the database file and its header.
///
/// Raw and unbuffered: the page cache is the only caller of the page-level
/// reads and writes. I/O errors are fatal; no repair is attempted here.
#[derive(Debug)]
pub struct Pager {
    file: File,
    header: DbHeader,
}

impl Pager {
    /// Open an existing database file or create a fresh one.
    ///
    /// A fresh file gets a newly initialized header written and fenced
    /// before the call returns. An existing file must pass magic, version,
    /// and page-size validation.
    pub fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let mut pager = Self {
            file,
            header: DbHeader::fresh(),
        };

        if len == 0 {
            pager.write_header()?;
        } else {
            let mut buf = [0u8; PAGE_SIZE];
            pager.file.seek(SeekFrom::Start(0))?;
            pager.file.read_exact(&mut buf)?;
            pager.header = DbHeader::decode(&buf)?;
        }

        Ok(pager)
    }

    pub fn header(&self) -> &DbHeader {
        &self.header
    }

    /// The current header serialized as a page image, as it exists on disk.
    pub fn header_image(&self) -> Box<PageBuf> {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        self.header.encode(&mut buf);
        buf
    }

    /// Apply a change to the header, then persist and fence it.
    pub fn update_header(&mut self, f: impl FnOnce(&mut DbHeader)) -> DbResult<()> {
        f(&mut self.header);
        self.write_header()
    }

    /// Allocate the next page number. The new page's content is undefined
    /// until first written; the cache zero-fills fresh allocations.
    pub fn allocate_page(&mut self) -> DbResult<PageId> {
        self.header.page_high_water += 1;
        self.write_header()?;
        Ok(PageId(self.header.page_high_water))
    }

    pub fn read_page(&mut self, page: PageId, buf: &mut PageBuf) -> DbResult<()> {
        self.check_page(page)?;
        self.file.seek(SeekFrom::Start(page_offset(page)))?;
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            // Allocated but never written; hand back zeroes.
            buf.fill(0);
            Ok(())
        } else if filled < PAGE_SIZE {
            Err(DbError::Corruption(format!(
                "short read on page {page}: {filled} of {PAGE_SIZE} bytes"
            )))
        } else {
            Ok(())
        }
    }

    pub fn write_page(&mut self, page: PageId, buf: &PageBuf) -> DbResult<()> {
        self.check_page(page)?;
        self.file.seek(SeekFrom::Start(page_offset(page)))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Serialize the header to page 1 and fence it to durable storage.
    pub fn write_header(&mut self) -> DbResult<()> {
        let mut buf = [0u8; PAGE_SIZE];
        self.header.encode(&mut buf);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Replace the header with a restored pre-image (undo/recovery path)
    /// and persist it.
    pub fn restore_header(&mut self, image: &PageBuf) -> DbResult<()> {
        self.header = DbHeader::decode(image)?;
        self.write_header()
    }

    /// Durability barrier over the data file.
    pub fn sync(&mut self) -> DbResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn check_page(&self, page: PageId) -> DbResult<()> {
        if page.0 < 2 || page.0 > self.header.page_high_water {
            return Err(DbError::Corruption(format!(
                "page {page} outside allocated range 2..={}",
                self.header.page_high_water
            )));
        }
        Ok(())
    }
}

fn page_offset(page: PageId) -> u64 {
    (page.0 as u64 - 1) * PAGE_SIZE as u64
}
