use super::*;
use block_device::BlockDevice;
use buf::SlotTable;
use worker::{ReadAheadQueue, StopSignal};

use log::{info, trace};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Sector-addressed cache over a fixed slot table.
///
/// A lookup runs under the table's metadata lock (hit, or evict + fault-in on a
/// miss, device I/O included); the byte transfer itself runs outside it under
/// the slot's own arbitration.
pub struct BufferCache {
    dev: Arc<dyn BlockDevice>,
    table: SlotTable,
    read_ahead: Option<Arc<ReadAheadQueue>>,
    /// sectors handed to the read-ahead queue
    read_ahead_requests: AtomicUsize,
    stop: Arc<StopSignal>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BufferCache {
    /// Cache with no background workers; read-ahead requests are ignored.
    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        Self::build(dev, false)
    }

    fn build(dev: Arc<dyn BlockDevice>, read_ahead: bool) -> Self {
        Self {
            dev,
            table: SlotTable::new(),
            read_ahead: read_ahead.then(|| Arc::new(ReadAheadQueue::new())),
            read_ahead_requests: AtomicUsize::new(0),
            stop: Arc::new(StopSignal::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Build the slot table and start write-behind (and read-ahead, if enabled).
    pub fn start(dev: Arc<dyn BlockDevice>, config: &CacheConfig) -> Result<Arc<Self>> {
        let cache = Arc::new(Self::build(dev, config.read_ahead));
        let mut workers = vec![worker::spawn_write_behind(
            Arc::downgrade(&cache),
            cache.stop.clone(),
            config.write_behind_interval,
        )?];
        if let Some(queue) = &cache.read_ahead {
            workers.push(worker::spawn_read_ahead(
                Arc::downgrade(&cache),
                queue.clone(),
            )?);
        }
        *cache.workers.lock().unwrap() = workers;
        info!("buffer cache up: {CACHE_SLOTS} slots, {config:?}");
        Ok(cache)
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.dev
    }

    /// Find or fault in `sector` and pin its slot.
    fn lookup(&self, sector: SectorId) -> usize {
        assert_ne!(sector, NO_SECTOR, "lookup of the no-sector sentinel");

        let mut map = self.table.lock();
        if let Some(&idx) = map.get(&sector) {
            self.table.slot(idx).pin();
            trace!("cache hit: sector {sector} in slot {idx}");
            return idx;
        }

        let idx = self.table.evict(&mut map, &*self.dev);
        self.table.install(&mut map, idx, sector, Some(&*self.dev), true);
        trace!("cache miss: sector {sector} -> slot {idx}");
        idx
    }

    /// Copy `buf.len()` bytes from `sector` at `offset` into `buf`.
    pub fn read(&self, sector: SectorId, buf: &mut [u8], offset: usize) {
        assert!(offset + buf.len() <= SECTOR_SIZE, "read beyond sector {sector}");
        let idx = self.lookup(sector);
        self.table.slot(idx).read(buf, offset);
    }

    /// Copy `buf` into `sector` at `offset`. The sector becomes dirty; the device
    /// sees it on eviction, write-behind or [`flush_all`](Self::flush_all).
    pub fn write(&self, sector: SectorId, buf: &[u8], offset: usize) {
        assert!(offset + buf.len() <= SECTOR_SIZE, "write beyond sector {sector}");
        if offset == 0 && buf.len() == SECTOR_SIZE && self.replace(sector, buf) {
            return;
        }
        let idx = self.lookup(sector);
        self.table.slot(idx).write(buf, offset);
    }

    /// Whole-sector write on a miss: no device read, and the slot only becomes
    /// reachable once it holds `buf`. Returns false on a hit.
    fn replace(&self, sector: SectorId, buf: &[u8]) -> bool {
        assert_ne!(sector, NO_SECTOR, "lookup of the no-sector sentinel");
        let mut map = self.table.lock();
        if map.contains_key(&sector) {
            return false;
        }
        let idx = self.table.evict(&mut map, &*self.dev);
        self.table.install(&mut map, idx, sector, None, true);
        self.table.slot(idx).write(buf, 0);
        trace!("cache miss: sector {sector} -> slot {idx}, replaced whole");
        true
    }

    /// Queue `sector` for the read-ahead worker.
    pub fn request_read_ahead(&self, sector: SectorId) {
        if let Some(queue) = &self.read_ahead {
            trace!("read-ahead request: sector {sector}");
            self.read_ahead_requests.fetch_add(1, Ordering::Relaxed);
            queue.push(sector);
        }
    }

    pub fn read_ahead_requests(&self) -> usize {
        self.read_ahead_requests.load(Ordering::Relaxed)
    }

    /// Bring `sector` in without pinning or copying it anywhere.
    pub fn prefetch(&self, sector: SectorId) {
        let mut map = self.table.lock();
        if map.contains_key(&sector) {
            return;
        }
        let idx = self.table.evict(&mut map, &*self.dev);
        self.table.install(&mut map, idx, sector, Some(&*self.dev), false);
        // survives one sweep so the foreground read can still find it
        self.table.slot(idx).touch();
    }

    /// One write-behind sweep. Returns how many slots went to the device.
    pub fn write_behind(&self) -> usize {
        self.table
            .slots()
            .iter()
            .filter(|slot| slot.is_dirty() && slot.write_back(&*self.dev))
            .count()
    }

    /// Write every dirty slot to the device, under the metadata lock, keeping
    /// every slot resident and every flag as it is.
    pub fn flush_all(&self) -> usize {
        let _map = self.table.lock();
        self.table
            .slots()
            .iter()
            .filter(|slot| slot.is_dirty() && slot.store(&*self.dev))
            .count()
    }

    /// Stop and join the workers. Does not flush.
    pub fn shutdown(&self) {
        self.signal_workers();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            let _ = handle.join();
        }
    }

    fn signal_workers(&self) {
        self.stop.stop();
        if let Some(queue) = &self.read_ahead {
            queue.close();
        }
    }

    pub fn is_cached(&self, sector: SectorId) -> bool {
        self.table.lock().contains_key(&sector)
    }

    pub fn pinned_slots(&self) -> usize {
        self.table.slots().iter().filter(|s| s.is_pinned()).count()
    }

    pub fn dirty_slots(&self) -> usize {
        self.table.slots().iter().filter(|s| s.is_dirty()).count()
    }

    pub fn resident_slots(&self) -> usize {
        self.table.lock().len()
    }
}

impl Drop for BufferCache {
    fn drop(&mut self) {
        self.signal_workers();
    }
}
