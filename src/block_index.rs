//! Two-level sector index of a file.
//!
//! inode record -> block directory (128 table pointers) -> block tables
//! (128 data pointers each) -> data sectors. The inode's `allocated` counter
//! always equals 1 (directory) + #tables + #data sectors.

use super::*;
use bitmap::SectorAllocator;
use block_cache::BufferCache;
use disk::{BlockDirectory, BlockTable, DiskInode, IndexBlock};

use log::{debug, warn};

const ZEROS: [u8; SECTOR_SIZE] = [0; SECTOR_SIZE];

pub struct IndexAllocator<'a> {
    cache: &'a BufferCache,
    free_map: &'a dyn SectorAllocator,
}

impl<'a> IndexAllocator<'a> {
    pub fn new(cache: &'a BufferCache, free_map: &'a dyn SectorAllocator) -> Self {
        Self { cache, free_map }
    }

    /// Take `count` single sectors, or none at all.
    fn allocate_batch(&self, count: usize) -> Result<Vec<SectorId>> {
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            match self.free_map.allocate(1) {
                Some(sector) => batch.push(sector),
                None => {
                    warn!("out of sectors after {} of {count}, rolling back", batch.len());
                    for &sector in batch.iter().rev() {
                        self.free_map.release(sector, 1);
                    }
                    return Err(FsError::NoSpace);
                }
            }
        }
        Ok(batch)
    }

    /// Zero each of `data` and hook them into `table` starting at slot `first`.
    fn populate(&self, table: &mut BlockTable, first: usize, data: &[SectorId]) {
        for (i, &sector) in data.iter().enumerate() {
            self.cache.write(sector, &ZEROS, 0);
            table.set(first + i, sector);
        }
    }

    /// Build whole new block tables for `data`, starting at directory slot
    /// `first_table`. `sectors` supplies one table sector per table followed by
    /// its data sectors.
    fn install_tables(
        &self,
        directory: &mut BlockDirectory,
        first_table: usize,
        sectors: &[SectorId],
        mut data_left: usize,
    ) -> usize {
        let mut next = 0;
        let mut ti = first_table;
        while next < sectors.len() {
            let table_sector = sectors[next];
            next += 1;
            let n = data_left.min(INDEX_ENTRIES);
            let mut table = IndexBlock::empty();
            self.populate(&mut table, 0, &sectors[next..next + n]);
            table.store(self.cache, table_sector);
            directory.set(ti, table_sector);
            next += n;
            data_left -= n;
            ti += 1;
        }
        ti - first_table
    }

    /// Write a fresh file of `length` bytes whose inode record lives at `sector`.
    ///
    /// Data sectors, then tables, then the directory, then the record reach the
    /// cache, so no pointer is ever written before what it points to.
    pub fn create(&self, sector: SectorId, length: usize, is_dir: bool, parent: SectorId) -> Result<()> {
        if length > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge { length });
        }
        let data = bytes_to_sectors(length);
        let tables = sectors_to_tables(data);
        let batch = self.allocate_batch(1 + tables + data)?;

        let mut directory = BlockDirectory::empty();
        let installed = self.install_tables(&mut directory, 0, &batch[1..], data);
        assert_eq!(installed, tables);
        directory.store(self.cache, batch[0]);

        let mut record = DiskInode::new(length as u32, is_dir, parent);
        record.directory = batch[0];
        record.table_count = tables as u32;
        record.allocated = batch.len() as u32;
        record.store(self.cache, sector);

        debug!("inode {sector}: created, {length} bytes, {tables} tables, {} sectors", batch.len());
        Ok(())
    }

    /// Extend the file to `new_length`, filling the last table's free slots
    /// first, then whole new tables. Existing data sectors never move.
    ///
    /// All new sectors are taken up front; on failure nothing has been touched
    /// and the sectors taken so far are back in the free map.
    pub fn grow(
        &self,
        sector: SectorId,
        record: &mut DiskInode,
        directory: &mut BlockDirectory,
        new_length: usize,
    ) -> Result<()> {
        assert!(new_length <= MAX_FILE_SIZE, "growth to {new_length} bytes");
        let old_length = record.length as usize;
        if new_length <= old_length {
            return Ok(());
        }

        let old_data = bytes_to_sectors(old_length);
        let new_data = bytes_to_sectors(new_length);
        let old_tables = record.table_count as usize;
        let new_tables = sectors_to_tables(new_data);
        assert_eq!(old_tables, sectors_to_tables(old_data), "inode {sector}: table count out of step");

        let added = (new_data - old_data) + (new_tables - old_tables);
        if added > 0 {
            let batch = self.allocate_batch(added)?;
            let mut next = 0;

            // tail of the last existing table
            let tail_end = (old_tables * INDEX_ENTRIES).min(new_data);
            if old_data < tail_end {
                let ti = old_data / INDEX_ENTRIES;
                let table_sector = directory
                    .get(ti)
                    .unwrap_or_else(|| panic!("inode {sector}: block table {ti} missing"));
                let mut table = IndexBlock::load(self.cache, table_sector);
                let n = tail_end - old_data;
                self.populate(&mut table, old_data % INDEX_ENTRIES, &batch[..n]);
                table.store(self.cache, table_sector);
                next = n;
            }

            let data_left = new_data - old_data - next;
            let installed = self.install_tables(directory, old_tables, &batch[next..], data_left);
            assert_eq!(installed, new_tables - old_tables);

            directory.store(self.cache, record.directory);
            record.table_count = new_tables as u32;
            record.allocated += added as u32;
            debug!("inode {sector}: grew {old_length} -> {new_length} bytes, +{added} sectors");
        }

        record.length = new_length as u32;
        record.store(self.cache, sector);
        Ok(())
    }

    /// Return every sector of the file, the inode's own sector included.
    ///
    /// Panics if the walk does not account for exactly `record.allocated` sectors.
    pub fn release(&self, sector: SectorId, record: &DiskInode, directory: &BlockDirectory) {
        let mut budget = record.allocated as i64 - 1; // directory

        for ti in 0..record.table_count as usize {
            let table_sector = directory
                .get(ti)
                .unwrap_or_else(|| panic!("inode {sector}: block table {ti} missing"));
            budget -= 1;
            let table = IndexBlock::load(self.cache, table_sector);
            for data in table.entries().iter().map_while(|entry| *entry) {
                if budget <= 0 {
                    break;
                }
                self.free_map.release(data, 1);
                budget -= 1;
            }
            self.free_map.release(table_sector, 1);
        }
        self.free_map.release(record.directory, 1);
        self.free_map.release(sector, 1);

        if budget != 0 {
            panic!("inode {sector}: {budget} sectors unaccounted for after release");
        }
        debug!("inode {sector}: released {} sectors", record.allocated + 1);
    }
}
