use std::time::Duration;

/// sector number on the device
pub type SectorId = u32;

/// sector size
pub const SECTOR_SIZE: usize = 512;

/// slots in the buffer cache
pub const CACHE_SLOTS: usize = 64;

/// sector pointers held by one index block (block directory or block table)
pub const INDEX_ENTRIES: usize = SECTOR_SIZE / std::mem::size_of::<SectorId>();

/// max # of bytes a file can address through one block directory
pub const MAX_FILE_SIZE: usize = INDEX_ENTRIES * INDEX_ENTRIES * SECTOR_SIZE;

/// "no sector" on disk
pub const NO_SECTOR: SectorId = SectorId::MAX;

pub const INODE_MAGIC: u32 = 0x494e4f44;

pub const FS_MAGIC: u32 = 0x53465346;

/// super block lives here
pub const SUPER_SECTOR: SectorId = 0;

/// first sector of the free map
pub const FREE_MAP_START: SectorId = 1;

/// bits per free map sector
pub const BITS_PER_SECTOR: usize = SECTOR_SIZE * 8;

/// initial size of the root directory (bytes)
pub const ROOT_DIR_LENGTH: usize = 16;

/// Number of sectors needed to hold `length` bytes.
pub fn bytes_to_sectors(length: usize) -> usize {
    length.div_ceil(SECTOR_SIZE)
}

/// Number of block tables needed to index `sectors` data sectors.
pub fn sectors_to_tables(sectors: usize) -> usize {
    sectors.div_ceil(INDEX_ENTRIES)
}

/// Tunables of the buffer cache and its background workers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// pause between two write-behind sweeps
    pub write_behind_interval: Duration,
    /// start the read-ahead worker and accept prefetch requests
    pub read_ahead: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        // 1000 ticks of a 100 Hz timer
        CacheConfig {
            write_behind_interval: Duration::from_secs(10),
            read_ahead: true,
        }
    }
}
