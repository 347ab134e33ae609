use super::*;
use bitmap::SectorAllocator;
use block_cache::BufferCache;
use block_index::IndexAllocator;
use disk::{BlockDirectory, DiskInode, IndexBlock};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// 1-based ordinal of the data sector holding byte `pos`.
fn sector_ordinal(pos: usize) -> usize {
    assert!(pos < MAX_FILE_SIZE, "byte offset {pos} beyond the addressable maximum");
    pos / SECTOR_SIZE + 1
}

/// Block directory slot of the table holding data sector `ordinal`.
fn directory_index(ordinal: usize) -> usize {
    assert!(ordinal >= 1);
    ordinal.div_ceil(INDEX_ENTRIES) - 1
}

/// Slot of data sector `ordinal` within its block table.
fn table_index(ordinal: usize) -> usize {
    assert!(ordinal >= 1);
    (ordinal - 1) % INDEX_ENTRIES
}

struct InodeState {
    record: DiskInode,
    /// Resident for the life of the open; block tables are read through the cache.
    directory: BlockDirectory,
}

/// inode in memory, shared by every opener of the same sector
pub struct Inode {
    sector: SectorId,
    cache: Arc<BufferCache>,
    free_map: Arc<dyn SectorAllocator>,
    state: RwLock<InodeState>,
    /// Changed only under the open-inode registry's lock.
    open_count: AtomicUsize,
    removed: AtomicBool,
    deny_write: AtomicUsize,
}

impl Inode {
    /// Read the inode record at `sector` and its block directory. The caller
    /// becomes the first opener.
    pub fn load(
        sector: SectorId,
        cache: Arc<BufferCache>,
        free_map: Arc<dyn SectorAllocator>,
    ) -> Result<Self> {
        let record = DiskInode::load(&cache, sector)?;
        if record.directory == NO_SECTOR {
            return Err(FsError::Corrupt {
                sector,
                detail: "inode without a block directory".to_string(),
            });
        }
        let directory = IndexBlock::load(&cache, record.directory);
        Ok(Inode {
            sector,
            cache,
            free_map,
            state: RwLock::new(InodeState { record, directory }),
            open_count: AtomicUsize::new(1),
            removed: AtomicBool::new(false),
            deny_write: AtomicUsize::new(0),
        })
    }

    pub fn inumber(&self) -> SectorId {
        self.sector
    }

    pub fn length(&self) -> usize {
        self.state.read().unwrap().record.length as usize
    }

    pub fn is_dir(&self) -> bool {
        self.state.read().unwrap().record.is_dir
    }

    pub fn parent(&self) -> SectorId {
        self.state.read().unwrap().record.parent
    }

    /// Sectors owned by the file: directory, tables and data.
    pub fn allocated_sectors(&self) -> usize {
        self.state.read().unwrap().record.allocated as usize
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Blocks are released when the last opener closes.
    pub fn remove(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub(crate) fn opened(&self) {
        self.open_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the remaining opener count.
    pub(crate) fn closed(&self) -> usize {
        let prev = self.open_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "inode {}: closed more often than opened", self.sector);
        prev - 1
    }

    /// Make `write_at` a no-op until the matching `allow_write`. At most once
    /// per opener.
    pub fn deny_write(&self) {
        let denied = self.deny_write.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(
            denied <= self.open_count(),
            "inode {}: {denied} write denials for {} openers",
            self.sector,
            self.open_count()
        );
    }

    pub fn allow_write(&self) {
        let prev = self.deny_write.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "inode {}: allow_write without deny_write", self.sector);
    }

    fn translate(&self, state: &InodeState, pos: usize) -> SectorId {
        let ordinal = sector_ordinal(pos);
        let di = directory_index(ordinal);
        let table = state
            .directory
            .get(di)
            .unwrap_or_else(|| panic!("inode {}: no block table for offset {pos}", self.sector));
        IndexBlock::lookup(&self.cache, table, table_index(ordinal))
            .unwrap_or_else(|| panic!("inode {}: no data sector for offset {pos}", self.sector))
    }

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the bytes
    /// read, short at end of file.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let state = self.state.read().unwrap();
        let length = state.record.length as usize;
        let (mut done, mut pos) = (0, offset);

        while done < buf.len() && pos < length {
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (buf.len() - done)
                .min(length - pos)
                .min(SECTOR_SIZE - sector_ofs);
            let sector = self.translate(&state, pos);
            self.cache.read(sector, &mut buf[done..done + chunk], sector_ofs);
            done += chunk;
            pos += chunk;

            if done < buf.len() && pos < length {
                self.cache.request_read_ahead(self.translate(&state, pos));
            }
        }
        done
    }

    /// Write `buf` at `offset`, growing the file first if the write ends past
    /// its length. Returns `Ok(0)` while writes are denied.
    ///
    /// A failed growth leaves the file as it was.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize> {
        if self.deny_write.load(Ordering::Acquire) > 0 || buf.is_empty() {
            return Ok(0);
        }
        let end = match offset.checked_add(buf.len()) {
            Some(end) if end <= MAX_FILE_SIZE => end,
            _ => panic!(
                "write of {} bytes at {offset} beyond the addressable maximum",
                buf.len()
            ),
        };

        if end > self.length() {
            let mut state = self.state.write().unwrap();
            // another writer may have grown it meanwhile
            if end > state.record.length as usize {
                let InodeState { record, directory } = &mut *state;
                IndexAllocator::new(&self.cache, &*self.free_map).grow(
                    self.sector,
                    record,
                    directory,
                    end,
                )?;
            }
        }

        let state = self.state.read().unwrap();
        let (mut done, mut pos) = (0, offset);
        while done < buf.len() {
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (buf.len() - done).min(SECTOR_SIZE - sector_ofs);
            let sector = self.translate(&state, pos);
            self.cache.write(sector, &buf[done..done + chunk], sector_ofs);
            done += chunk;
            pos += chunk;
        }
        Ok(done)
    }

    /// Give every sector of the file back to the free map.
    pub(crate) fn release_blocks(&self) {
        let state = self.state.read().unwrap();
        IndexAllocator::new(&self.cache, &*self.free_map).release(
            self.sector,
            &state.record,
            &state.directory,
        );
    }
}
