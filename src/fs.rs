use super::*;
use bitmap::{FreeMap, SectorAllocator};
use block_cache::BufferCache;
use block_device::BlockDevice;
use disk::SuperBlock;
use inode::Inode;
use vfs::InodeTable;

use log::{debug, info};
use std::sync::Arc;

/// A formatted device: super block, free map, buffer cache and open inodes.
pub struct FileSystem {
    cache: Arc<BufferCache>,
    free_map: Arc<FreeMap>,
    inodes: InodeTable,
    super_block: SuperBlock,
}

impl FileSystem {
    /// Lay out a fresh file system over the whole device and create the root
    /// directory inode.
    pub fn format(device: Arc<dyn BlockDevice>, config: &CacheConfig) -> Result<Self> {
        let sectors = device.sector_count();
        let free_map_sectors = FreeMap::sectors_for(sectors as usize);
        let reserved = FREE_MAP_START as usize + free_map_sectors;
        // root inode and its block directory
        if reserved + 2 > sectors as usize {
            return Err(FsError::NoSpace);
        }

        let cache = BufferCache::start(device, config)?;
        let free_map = Arc::new(FreeMap::new(FREE_MAP_START, sectors as usize, reserved));
        let inodes = InodeTable::new(cache.clone(), free_map.clone());

        let root = free_map.allocate(1).ok_or(FsError::NoSpace)?;
        inodes.create(root, ROOT_DIR_LENGTH, true, root)?;
        let super_block = SuperBlock::new(sectors, free_map_sectors as u32, root);
        cache.write(SUPER_SECTOR, &super_block.encode(), 0);

        let fs = FileSystem {
            cache,
            free_map,
            inodes,
            super_block,
        };
        fs.sync();
        info!("formatted {sectors} sectors, free map {free_map_sectors} sectors, root inode {root}");
        Ok(fs)
    }

    pub fn mount(device: Arc<dyn BlockDevice>, config: &CacheConfig) -> Result<Self> {
        let sectors = device.sector_count();
        let cache = BufferCache::start(device, config)?;

        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(SUPER_SECTOR, &mut buf, 0);
        let super_block = SuperBlock::decode(&buf)?;
        if super_block.sectors != sectors {
            return Err(FsError::Corrupt {
                sector: SUPER_SECTOR,
                detail: format!(
                    "super block describes {} sectors, device has {sectors}",
                    super_block.sectors
                ),
            });
        }

        let free_map = Arc::new(FreeMap::load(
            super_block.free_map_start,
            sectors as usize,
            &cache,
        ));
        let inodes = InodeTable::new(cache.clone(), free_map.clone());
        info!(
            "mounted {sectors} sectors, {} free, root inode {}",
            free_map.free_count(),
            super_block.root
        );
        Ok(FileSystem {
            cache,
            free_map,
            inodes,
            super_block,
        })
    }

    /// Allocate an inode sector and build a file of `length` zero bytes there.
    /// Returns the new inode's sector; on failure nothing stays allocated.
    pub fn create(&self, length: usize, is_dir: bool, parent: SectorId) -> Result<SectorId> {
        let sector = self.free_map.allocate(1).ok_or(FsError::NoSpace)?;
        if let Err(e) = self.inodes.create(sector, length, is_dir, parent) {
            self.free_map.release(sector, 1);
            return Err(e);
        }
        Ok(sector)
    }

    pub fn open(&self, sector: SectorId) -> Result<Arc<Inode>> {
        self.check_allocated(sector)?;
        self.inodes.open(sector)
    }

    pub fn close(&self, inode: Arc<Inode>) {
        self.inodes.close(inode)
    }

    /// Mark the inode removed; its sectors return to the free map once nobody
    /// has it open.
    pub fn remove(&self, sector: SectorId) -> Result<()> {
        let inode = self.open(sector)?;
        inode.remove();
        self.inodes.close(inode);
        Ok(())
    }

    /// A freed or out-of-range sector holds no inode; its old record may
    /// still decode.
    fn check_allocated(&self, sector: SectorId) -> Result<()> {
        if sector >= self.super_block.sectors || !self.free_map.is_used(sector) {
            return Err(FsError::NotFound { sector });
        }
        Ok(())
    }

    pub fn root(&self) -> SectorId {
        self.super_block.root
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn free_sectors(&self) -> usize {
        self.free_map.free_count()
    }

    pub fn cache(&self) -> &Arc<BufferCache> {
        &self.cache
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    /// Persist the free map and push every dirty sector to the device.
    pub fn sync(&self) {
        self.free_map.store(&self.cache);
        let flushed = self.cache.flush_all();
        debug!("sync: {flushed} sectors written");
    }

    pub fn shutdown(self) {
        self.sync();
        self.cache.shutdown();
        info!("shut down, {} sectors free", self.free_map.free_count());
    }
}
