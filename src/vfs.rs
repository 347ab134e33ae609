use super::*;
use bitmap::SectorAllocator;
use block_cache::BufferCache;
use block_index::IndexAllocator;
use inode::Inode;

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry of open inodes, keyed by inode sector. Every opener of a sector
/// shares one `Inode`; its opener count only changes under the registry lock.
pub struct InodeTable {
    cache: Arc<BufferCache>,
    free_map: Arc<dyn SectorAllocator>,
    open: Mutex<HashMap<SectorId, Arc<Inode>>>,
}

impl InodeTable {
    pub fn new(cache: Arc<BufferCache>, free_map: Arc<dyn SectorAllocator>) -> Self {
        Self {
            cache,
            free_map,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Write a new inode of `length` zero bytes at the already allocated `sector`.
    pub fn create(&self, sector: SectorId, length: usize, is_dir: bool, parent: SectorId) -> Result<()> {
        IndexAllocator::new(&self.cache, &*self.free_map).create(sector, length, is_dir, parent)
    }

    pub fn open(&self, sector: SectorId) -> Result<Arc<Inode>> {
        let mut open = self.open.lock().unwrap();
        if let Some(inode) = open.get(&sector) {
            inode.opened();
            return Ok(inode.clone());
        }
        let inode = Arc::new(Inode::load(sector, self.cache.clone(), self.free_map.clone())?);
        open.insert(sector, inode.clone());
        debug!("inode {sector}: opened");
        Ok(inode)
    }

    pub fn reopen(&self, inode: &Arc<Inode>) -> Arc<Inode> {
        let _open = self.open.lock().unwrap();
        assert!(
            inode.open_count() > 0,
            "reopen of closed inode {}",
            inode.inumber()
        );
        inode.opened();
        inode.clone()
    }

    /// Drop one opener. The last close of a removed inode releases its blocks.
    ///
    /// The release runs under the registry lock so a concurrent `open` of the
    /// same sector cannot see a half-released file.
    pub fn close(&self, inode: Arc<Inode>) {
        let mut open = self.open.lock().unwrap();
        if inode.closed() > 0 {
            return;
        }
        open.remove(&inode.inumber());
        debug!("inode {}: closed by last opener", inode.inumber());
        if inode.is_removed() {
            inode.release_blocks();
        }
    }

    pub fn open_inodes(&self) -> usize {
        self.open.lock().unwrap().len()
    }
}
