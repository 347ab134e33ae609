#![allow(dead_code)]

use sectorfs::{
    BlockDevice, BufferCache, FreeMap, InodeTable, MemDisk, SectorAllocator, SectorId,
    FREE_MAP_START, SECTOR_SIZE,
};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// MemDisk that remembers every sector written to it.
pub struct RecordingDisk {
    inner: MemDisk,
    writes: Mutex<Vec<SectorId>>,
}

impl RecordingDisk {
    pub fn new(sectors: u32) -> Self {
        Self {
            inner: MemDisk::new(sectors),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self) -> Vec<SectorId> {
        self.writes.lock().unwrap().clone()
    }

    pub fn was_written(&self, sector: SectorId) -> bool {
        self.writes.lock().unwrap().contains(&sector)
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn raw(&self, sector: SectorId) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        self.inner.read_sector(sector, &mut buf);
        buf
    }
}

impl BlockDevice for RecordingDisk {
    fn read_sector(&self, sector: SectorId, buf: &mut [u8; SECTOR_SIZE]) {
        self.inner.read_sector(sector, buf)
    }

    fn write_sector(&self, sector: SectorId, buf: &[u8; SECTOR_SIZE]) {
        self.writes.lock().unwrap().push(sector);
        self.inner.write_sector(sector, buf)
    }

    fn sector_count(&self) -> u32 {
        self.inner.sector_count()
    }
}

/// FreeMap that counts calls and can be told to run dry.
pub struct CountingAllocator {
    inner: FreeMap,
    allocs: AtomicUsize,
    releases: AtomicUsize,
    outstanding: AtomicIsize,
    /// allocations left before every further one fails
    budget: Mutex<Option<usize>>,
}

impl CountingAllocator {
    pub fn new(sectors: u32) -> Self {
        Self {
            inner: FreeMap::new(FREE_MAP_START, sectors as usize, 2),
            allocs: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            outstanding: AtomicIsize::new(0),
            budget: Mutex::new(None),
        }
    }

    pub fn fail_after(&self, allocations: usize) {
        *self.budget.lock().unwrap() = Some(allocations);
    }

    pub fn unlimited(&self) {
        *self.budget.lock().unwrap() = None;
    }

    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> isize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn free_count(&self) -> usize {
        self.inner.free_count()
    }
}

impl SectorAllocator for CountingAllocator {
    fn allocate(&self, count: usize) -> Option<SectorId> {
        if let Some(left) = self.budget.lock().unwrap().as_mut() {
            if *left < count {
                return None;
            }
            *left -= count;
        }
        let sector = self.inner.allocate(count)?;
        self.allocs.fetch_add(count, Ordering::SeqCst);
        self.outstanding.fetch_add(count as isize, Ordering::SeqCst);
        Some(sector)
    }

    fn release(&self, start: SectorId, count: usize) {
        self.inner.release(start, count);
        self.releases.fetch_add(count, Ordering::SeqCst);
        self.outstanding.fetch_sub(count as isize, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub disk: Arc<RecordingDisk>,
    pub cache: Arc<BufferCache>,
    pub alloc: Arc<CountingAllocator>,
    pub inodes: InodeTable,
}

impl Harness {
    /// No background workers.
    pub fn new(sectors: u32) -> Self {
        let disk = Arc::new(RecordingDisk::new(sectors));
        let cache = Arc::new(BufferCache::new(disk.clone()));
        Self::with_cache(disk, cache, sectors)
    }

    pub fn with_cache(disk: Arc<RecordingDisk>, cache: Arc<BufferCache>, sectors: u32) -> Self {
        let alloc = Arc::new(CountingAllocator::new(sectors));
        let inodes = InodeTable::new(cache.clone(), alloc.clone());
        Self {
            disk,
            cache,
            alloc,
            inodes,
        }
    }

    /// New file of `length` bytes; returns its inode sector.
    pub fn create(&self, length: usize) -> SectorId {
        let sector = self.alloc.allocate(1).expect("inode sector");
        self.inodes.create(sector, length, false, 1).expect("create");
        sector
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` until it holds or `timeout` runs out.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
