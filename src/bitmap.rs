use super::*;
use block_cache::BufferCache;

use std::sync::Mutex;

/// Free-sector allocator seen by the inode layer.
pub trait SectorAllocator: Send + Sync {
    /// Take `count` consecutive free sectors and return the first one.
    fn allocate(&self, count: usize) -> Option<SectorId>;
    /// Give back `count` sectors starting at `start`.
    fn release(&self, start: SectorId, count: usize);
}

/// Bitmap of used sectors, one bit per device sector, persisted right after the super block.
pub struct FreeMap {
    start: SectorId,
    sectors: usize, // # of device sectors tracked
    bits: Mutex<Vec<u8>>,
}

impl FreeMap {
    /// Sectors of bitmap needed to track `sectors` device sectors.
    pub fn sectors_for(sectors: usize) -> usize {
        sectors.div_ceil(BITS_PER_SECTOR)
    }

    /// Fresh map with every sector free except `[0, reserved)`.
    pub fn new(start: SectorId, sectors: usize, reserved: usize) -> Self {
        let mut bits = vec![0u8; Self::sectors_for(sectors) * SECTOR_SIZE];
        for bno in 0..reserved {
            bits[bno / 8] |= 1 << (bno % 8);
        }
        Self {
            start,
            sectors,
            bits: Mutex::new(bits),
        }
    }

    /// Read the map back through the cache.
    pub fn load(start: SectorId, sectors: usize, cache: &BufferCache) -> Self {
        let len = Self::sectors_for(sectors);
        let mut bits = vec![0u8; len * SECTOR_SIZE];
        for (i, chunk) in bits.chunks_mut(SECTOR_SIZE).enumerate() {
            cache.read(start + i as SectorId, chunk, 0);
        }
        Self {
            start,
            sectors,
            bits: Mutex::new(bits),
        }
    }

    /// Write the map through the cache.
    pub fn store(&self, cache: &BufferCache) {
        let bits = self.bits.lock().unwrap();
        for (i, chunk) in bits.chunks(SECTOR_SIZE).enumerate() {
            cache.write(self.start + i as SectorId, chunk, 0);
        }
    }

    pub fn free_count(&self) -> usize {
        let bits = self.bits.lock().unwrap();
        (0..self.sectors)
            .filter(|bno| bits[bno / 8] & (1 << (bno % 8)) == 0)
            .count()
    }

    pub fn is_used(&self, sector: SectorId) -> bool {
        let bno = sector as usize;
        self.bits.lock().unwrap()[bno / 8] & (1 << (bno % 8)) != 0
    }
}

impl SectorAllocator for FreeMap {
    fn allocate(&self, count: usize) -> Option<SectorId> {
        if count == 0 {
            return None;
        }
        let mut bits = self.bits.lock().unwrap();
        let mut run = 0;
        for bno in 0..self.sectors {
            let byte = bno / 8;
            let mask = 1 << (bno % 8);
            if bits[byte] & mask == 0 {
                run += 1;
                if run == count {
                    let first = bno + 1 - count;
                    for b in first..=bno {
                        bits[b / 8] |= 1 << (b % 8);
                    }
                    return Some(first as SectorId);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    fn release(&self, start: SectorId, count: usize) {
        let mut bits = self.bits.lock().unwrap();
        for bno in start as usize..start as usize + count {
            let byte = bno / 8;
            let mask = 1 << (bno % 8);
            assert!(bits[byte] & mask != 0, "release of free sector {bno}");
            bits[byte] &= !mask;
        }
    }
}
