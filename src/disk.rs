//! Disk layout:
//! [ super block | free map (n sectors) | inodes, block directories, block tables, data ... ]
//!
//! Every structure fills exactly one sector. "No sector" is stored as all ones
//! and surfaces as `None` in memory.

use super::*;
use block_cache::BufferCache;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

fn encode<T: Serialize>(value: &T) -> [u8; SECTOR_SIZE] {
    let bytes = match bincode::serialize(value) {
        Ok(bytes) => bytes,
        Err(e) => panic!("on-disk record does not encode: {e}"),
    };
    assert!(bytes.len() <= SECTOR_SIZE);
    let mut sector = [0u8; SECTOR_SIZE];
    sector[..bytes.len()].copy_from_slice(&bytes);
    sector
}

fn decode<T: DeserializeOwned>(sector: SectorId, buf: &[u8; SECTOR_SIZE]) -> Result<T> {
    bincode::deserialize(buf).map_err(|e| FsError::Corrupt {
        sector,
        detail: e.to_string(),
    })
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SuperBlock {
    /// Must be FS_MAGIC
    pub magic: u32,
    /// Size of the device (sectors)
    pub sectors: u32,
    /// First free map sector
    pub free_map_start: SectorId,
    /// Number of free map sectors
    pub free_map_sectors: u32,
    /// Inode of the root directory
    pub root: SectorId,
}

impl SuperBlock {
    pub fn new(sectors: u32, free_map_sectors: u32, root: SectorId) -> Self {
        SuperBlock {
            magic: FS_MAGIC,
            sectors,
            free_map_start: FREE_MAP_START,
            free_map_sectors,
            root,
        }
    }

    pub fn encode(&self) -> [u8; SECTOR_SIZE] {
        encode(self)
    }

    pub fn decode(buf: &[u8; SECTOR_SIZE]) -> Result<Self> {
        let sb: SuperBlock = decode(SUPER_SECTOR, buf)?;
        if sb.magic != FS_MAGIC {
            return Err(FsError::Corrupt {
                sector: SUPER_SECTOR,
                detail: format!("super block magic {:#x}", sb.magic),
            });
        }
        Ok(sb)
    }
}

/// inode on disk
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DiskInode {
    /// Size of file (bytes)
    pub length: u32,
    /// Must be INODE_MAGIC
    pub magic: u32,
    /// Inode of the containing directory
    pub parent: SectorId,
    pub is_dir: bool,
    /// Block directory sector
    pub directory: SectorId,
    /// Block tables in use
    pub table_count: u32,
    /// Sectors owned by this file: directory + tables + data
    pub allocated: u32,
}

impl DiskInode {
    pub fn new(length: u32, is_dir: bool, parent: SectorId) -> Self {
        DiskInode {
            length,
            magic: INODE_MAGIC,
            parent,
            is_dir,
            directory: NO_SECTOR,
            table_count: 0,
            allocated: 0,
        }
    }

    pub fn encode(&self) -> [u8; SECTOR_SIZE] {
        encode(self)
    }

    pub fn decode(sector: SectorId, buf: &[u8; SECTOR_SIZE]) -> Result<Self> {
        let inode: DiskInode = decode(sector, buf)?;
        if inode.magic != INODE_MAGIC {
            return Err(FsError::Corrupt {
                sector,
                detail: format!("inode magic {:#x}", inode.magic),
            });
        }
        Ok(inode)
    }

    pub fn load(cache: &BufferCache, sector: SectorId) -> Result<Self> {
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(sector, &mut buf, 0);
        Self::decode(sector, &buf)
    }

    pub fn store(&self, cache: &BufferCache, sector: SectorId) {
        cache.write(sector, &self.encode(), 0);
    }
}

/// One sector of sector pointers: a block directory (pointing at block tables)
/// or a block table (pointing at data sectors).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexBlock {
    entries: [Option<SectorId>; INDEX_ENTRIES],
}

pub type BlockDirectory = IndexBlock;
pub type BlockTable = IndexBlock;

fn entry_from_disk(raw: SectorId) -> Option<SectorId> {
    (raw != NO_SECTOR).then_some(raw)
}

impl IndexBlock {
    pub fn empty() -> Self {
        IndexBlock {
            entries: [None; INDEX_ENTRIES],
        }
    }

    pub fn get(&self, idx: usize) -> Option<SectorId> {
        self.entries[idx]
    }

    pub fn set(&mut self, idx: usize, sector: SectorId) {
        assert_ne!(sector, NO_SECTOR);
        self.entries[idx] = Some(sector);
    }

    pub fn entries(&self) -> &[Option<SectorId>] {
        &self.entries
    }

    pub fn encode(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        for (raw, entry) in buf.chunks_exact_mut(4).zip(self.entries.iter()) {
            raw.copy_from_slice(&entry.unwrap_or(NO_SECTOR).to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8; SECTOR_SIZE]) -> Self {
        let mut block = Self::empty();
        for (entry, raw) in block.entries.iter_mut().zip(buf.chunks_exact(4)) {
            *entry = entry_from_disk(SectorId::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
        }
        block
    }

    pub fn load(cache: &BufferCache, sector: SectorId) -> Self {
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(sector, &mut buf, 0);
        Self::decode(&buf)
    }

    pub fn store(&self, cache: &BufferCache, sector: SectorId) {
        cache.write(sector, &self.encode(), 0);
    }

    /// Read a single entry of the index block at `sector` through the cache.
    pub fn lookup(cache: &BufferCache, sector: SectorId, idx: usize) -> Option<SectorId> {
        let mut raw = [0u8; 4];
        cache.read(sector, &mut raw, idx * 4);
        entry_from_disk(SectorId::from_le_bytes(raw))
    }
}
