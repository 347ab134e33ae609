//! Sector-granular storage engine: buffer cache, two-level file index and inode layer.

mod bitmap; // free-sector map
mod block_cache;
mod block_device;
mod block_index;
mod buf; // cache slots
mod common;
mod disk; // on-disk structures
mod error;
mod fs;
mod inode;
mod sync;
mod vfs; // open inodes
mod worker;

pub use common::*;
pub use error::{FsError, Result};

pub use bitmap::{FreeMap, SectorAllocator};
pub use block_cache::BufferCache;
pub use block_device::{BlockDevice, FileDisk, MemDisk};
pub use block_index::IndexAllocator;
pub use buf::{Slot, SlotTable};
pub use disk::{BlockDirectory, BlockTable, DiskInode, IndexBlock, SuperBlock};
pub use fs::FileSystem;
pub use inode::Inode;
pub use vfs::InodeTable;
