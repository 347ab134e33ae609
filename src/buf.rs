//! Slot table of the buffer cache.
//!
//! Every slot owns one sector's bytes. Who may touch what:
//! - the table's metadata lock ([`SlotTable::lock`]) guards the sector -> slot map,
//!   slot reservation and victim selection;
//! - a slot's bytes are guarded by its own readers/writer arbitration: the short-held
//!   `readers` count and the `content` permit, taken by the first reader and given
//!   back by the last one, or held alone by a writer.

use super::*;
use block_device::BlockDevice;
use sync::Semaphore;

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

pub struct Slot {
    data: UnsafeCell<[u8; SECTOR_SIZE]>,
    /// holds a real sector
    valid: AtomicBool,
    /// modified since load / last write-back
    dirty: AtomicBool,
    /// referenced since the last eviction sweep
    accessed: AtomicBool,
    /// in-flight lookups; > 0 means pinned
    pins: AtomicUsize,
    sector: AtomicU32,
    readers: Mutex<usize>,
    content: Semaphore,
}

// SAFETY: `data` is only read while the caller is one of the readers that
// collectively hold `content`, and only written while holding `content` alone.
unsafe impl Sync for Slot {}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            data: UnsafeCell::new([0; SECTOR_SIZE]),
            valid: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            accessed: AtomicBool::new(false),
            pins: AtomicUsize::new(0),
            sector: AtomicU32::new(NO_SECTOR),
            readers: Mutex::new(0),
            content: Semaphore::new(1),
        }
    }
}

impl Slot {
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn is_accessed(&self) -> bool {
        self.accessed.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }

    /// Resident sector, if any.
    pub fn sector(&self) -> Option<SectorId> {
        self.is_valid().then(|| self.sector.load(Ordering::Acquire))
    }

    pub fn reader_count(&self) -> usize {
        *self.readers.lock().unwrap()
    }

    pub fn touch(&self) {
        self.accessed.store(true, Ordering::Release);
    }

    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "unpin of an unpinned slot");
    }

    /// Copy `buf.len()` bytes at `offset` out of the slot, then drop the caller's pin.
    pub fn read(&self, buf: &mut [u8], offset: usize) {
        if offset + buf.len() > SECTOR_SIZE {
            panic!("read beyond cache slot: offset {offset} len {}", buf.len());
        }

        {
            let mut readers = self.readers.lock().unwrap();
            *readers += 1;
            if *readers == 1 {
                self.content.down(); // first reader
            }
        }

        // SAFETY: the readers as a group hold `content`, no writer can be active.
        let data = unsafe { &*self.data.get() };
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        self.accessed.store(true, Ordering::Release);

        {
            let mut readers = self.readers.lock().unwrap();
            *readers -= 1;
            if *readers == 0 {
                self.content.up(); // last reader
            }
        }
        self.unpin();
    }

    /// Copy `buf` into the slot at `offset`, then drop the caller's pin.
    pub fn write(&self, buf: &[u8], offset: usize) {
        if offset + buf.len() > SECTOR_SIZE {
            panic!("write beyond cache slot: offset {offset} len {}", buf.len());
        }

        self.content.down();
        // SAFETY: `content` is held exclusively.
        let data = unsafe { &mut *self.data.get() };
        data[offset..offset + buf.len()].copy_from_slice(buf);
        self.dirty.store(true, Ordering::Release);
        self.accessed.store(true, Ordering::Release);
        self.content.up();
        self.unpin();
    }

    /// Load `sector` from the device into this empty slot.
    fn fill(&self, sector: SectorId, dev: &dyn BlockDevice) {
        if self.is_valid() {
            panic!("fill of a valid slot (holds sector {})", self.sector.load(Ordering::Acquire));
        }
        self.content.down();
        // SAFETY: `content` is held exclusively.
        dev.read_sector(sector, unsafe { &mut *self.data.get() });
        self.content.up();
        self.claim(sector);
    }

    /// Make this empty slot the home of `sector` without reading the device.
    fn claim(&self, sector: SectorId) {
        self.sector.store(sector, Ordering::Release);
        self.valid.store(true, Ordering::Release);
    }

    /// Write the slot to its sector if dirty and clear `dirty`. Returns whether it wrote.
    pub fn write_back(&self, dev: &dyn BlockDevice) -> bool {
        self.content.down();
        let wrote = self.store_locked(dev);
        if wrote {
            self.dirty.store(false, Ordering::Release);
        }
        self.content.up();
        wrote
    }

    /// Write the slot to its sector if dirty, leaving every flag alone.
    pub fn store(&self, dev: &dyn BlockDevice) -> bool {
        self.content.down();
        let wrote = self.store_locked(dev);
        self.content.up();
        wrote
    }

    fn store_locked(&self, dev: &dyn BlockDevice) -> bool {
        if !(self.is_valid() && self.is_dirty()) {
            return false;
        }
        // SAFETY: caller holds `content` exclusively.
        let data = unsafe { &*self.data.get() };
        dev.write_sector(self.sector.load(Ordering::Acquire), data);
        true
    }

    /// Empty the slot: zero every flag and byte.
    fn reset(&self) {
        let _readers = self.readers.lock().unwrap();
        self.content.down();
        assert!(!self.is_pinned(), "reset of a pinned slot");
        self.valid.store(false, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.accessed.store(false, Ordering::Release);
        self.sector.store(NO_SECTOR, Ordering::Release);
        // SAFETY: both arbitration levels are held.
        unsafe { (*self.data.get()).fill(0) };
        self.content.up();
    }
}

/// sector -> slot index, guarded by the metadata lock
pub type SlotMap = HashMap<SectorId, usize>;

pub struct SlotTable {
    slots: Box<[Slot]>,
    map: Mutex<SlotMap>,
}

impl SlotTable {
    pub fn new() -> Self {
        SlotTable {
            slots: (0..CACHE_SLOTS).map(|_| Slot::default()).collect(),
            map: Mutex::new(HashMap::with_capacity(CACHE_SLOTS)),
        }
    }

    /// Take the metadata lock.
    pub fn lock(&self) -> MutexGuard<'_, SlotMap> {
        self.map.lock().unwrap()
    }

    pub fn slot(&self, idx: usize) -> &Slot {
        &self.slots[idx]
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Second-chance scan from slot 0: an empty slot wins at once, pinned slots
    /// are skipped, an accessed slot loses its flag and is skipped. Two passes
    /// at most; `None` means every slot is pinned.
    pub fn select_victim(&self, _map: &SlotMap) -> Option<usize> {
        for _pass in 0..2 {
            for (idx, slot) in self.slots.iter().enumerate() {
                if !slot.is_valid() {
                    return Some(idx);
                }
                if slot.is_pinned() {
                    continue;
                }
                if slot.accessed.swap(false, Ordering::AcqRel) {
                    continue;
                }
                return Some(idx);
            }
        }
        None
    }

    /// Free up a slot, writing its old content back first if dirty, and return its index.
    ///
    /// Spins while every slot is pinned; pins are dropped without the metadata lock.
    pub fn evict(&self, map: &mut SlotMap, dev: &dyn BlockDevice) -> usize {
        let idx = loop {
            match self.select_victim(map) {
                Some(idx) => break idx,
                None => {
                    log::warn!("all {CACHE_SLOTS} cache slots pinned, rescanning");
                    std::thread::yield_now();
                }
            }
        };

        let slot = &self.slots[idx];
        if let Some(old) = slot.sector() {
            if slot.write_back(dev) {
                log::debug!("evict slot {idx}: wrote back dirty sector {old}");
            } else {
                log::trace!("evict slot {idx}: dropped clean sector {old}");
            }
            map.remove(&old);
            slot.reset();
        }
        idx
    }

    /// Make the empty slot `idx` the home of `sector`, loading it from `dev` when
    /// given, and pin it for the caller when `pin` is set.
    pub fn install(
        &self,
        map: &mut SlotMap,
        idx: usize,
        sector: SectorId,
        dev: Option<&dyn BlockDevice>,
        pin: bool,
    ) {
        let slot = &self.slots[idx];
        match dev {
            Some(dev) => slot.fill(sector, dev),
            None => slot.claim(sector),
        }
        if pin {
            slot.pin();
        }
        if let Some(other) = map.insert(sector, idx) {
            panic!("sector {sector} cached twice (slots {other} and {idx})");
        }
    }
}
