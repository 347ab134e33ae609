use super::*;

use std::any::Any;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

/// Raw sector device. Both calls are synchronous and either succeed or bring the system down.
pub trait BlockDevice: Send + Sync + Any {
    fn read_sector(&self, sector: SectorId, buf: &mut [u8; SECTOR_SIZE]);
    fn write_sector(&self, sector: SectorId, buf: &[u8; SECTOR_SIZE]);
    fn sector_count(&self) -> u32;
}

/// RAM-backed device.
pub struct MemDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemDisk {
    pub fn new(sector_count: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; sector_count as usize]),
        }
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&self, sector: SectorId, buf: &mut [u8; SECTOR_SIZE]) {
        let sectors = self.sectors.lock().unwrap();
        assert!((sector as usize) < sectors.len(), "read past end of device: sector {sector}");
        buf.copy_from_slice(&sectors[sector as usize]);
    }

    fn write_sector(&self, sector: SectorId, buf: &[u8; SECTOR_SIZE]) {
        let mut sectors = self.sectors.lock().unwrap();
        assert!((sector as usize) < sectors.len(), "write past end of device: sector {sector}");
        sectors[sector as usize].copy_from_slice(buf);
    }

    fn sector_count(&self) -> u32 {
        self.sectors.lock().unwrap().len() as u32
    }
}

/// Image file on the host, addressed with pread/pwrite.
pub struct FileDisk {
    file: File,
    sector_count: u32,
}

impl FileDisk {
    /// Create (or truncate) an image of `sector_count` zeroed sectors.
    pub fn create(path: impl AsRef<Path>, sector_count: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(sector_count as u64 * SECTOR_SIZE as u64)?;
        Ok(Self { file, sector_count })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let sector_count = (file.metadata()?.len() / SECTOR_SIZE as u64) as u32;
        Ok(Self { file, sector_count })
    }
}

impl BlockDevice for FileDisk {
    fn read_sector(&self, sector: SectorId, buf: &mut [u8; SECTOR_SIZE]) {
        assert!(sector < self.sector_count, "read past end of image: sector {sector}");
        if let Err(e) = self.file.read_exact_at(buf, sector as u64 * SECTOR_SIZE as u64) {
            panic!("read of sector {sector} failed: {e}");
        }
    }

    fn write_sector(&self, sector: SectorId, buf: &[u8; SECTOR_SIZE]) {
        assert!(sector < self.sector_count, "write past end of image: sector {sector}");
        if let Err(e) = self.file.write_all_at(buf, sector as u64 * SECTOR_SIZE as u64) {
            panic!("write of sector {sector} failed: {e}");
        }
    }

    fn sector_count(&self) -> u32 {
        self.sector_count
    }
}
