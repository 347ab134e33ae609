mod common;

use common::*;
use sectorfs::{
    BlockDevice, BufferCache, CacheConfig, FileDisk, FileSystem, CACHE_SLOTS, SECTOR_SIZE,
};
use std::sync::Arc;
use std::time::Duration;

const PATIENCE: Duration = Duration::from_secs(5);

fn started(disk: &Arc<RecordingDisk>, interval: Duration, read_ahead: bool) -> Arc<BufferCache> {
    let config = CacheConfig {
        write_behind_interval: interval,
        read_ahead,
    };
    BufferCache::start(disk.clone(), &config).unwrap()
}

#[test]
fn writes_stay_in_cache_until_evicted() {
    init_logging();
    let disk = Arc::new(RecordingDisk::new(512));
    let cache = BufferCache::new(disk.clone());
    cache.write(5, b"dirty", 0);
    assert!(disk.writes().is_empty());

    let mut byte = [0u8; 1];
    for sector in 100..100 + 2 * CACHE_SLOTS as u32 {
        cache.read(sector, &mut byte, 0);
    }
    assert!(!cache.is_cached(5));
    assert_eq!(disk.writes(), vec![5]);
    assert_eq!(&disk.raw(5)[..5], b"dirty");
}

#[test]
fn clean_eviction_writes_nothing() {
    let disk = Arc::new(RecordingDisk::new(512));
    let cache = BufferCache::new(disk.clone());
    let mut byte = [0u8; 1];
    for sector in 0..3 * CACHE_SLOTS as u32 {
        cache.read(sector, &mut byte, 0);
    }
    assert!(disk.writes().is_empty());
    assert_eq!(cache.resident_slots(), CACHE_SLOTS);
}

#[test]
fn flush_all_writes_every_dirty_sector_once() {
    let disk = Arc::new(RecordingDisk::new(512));
    let cache = BufferCache::new(disk.clone());
    for sector in 10..20 {
        cache.write(sector, &[sector as u8; 16], 100);
    }
    cache.read(30, &mut [0u8; 4], 0);
    assert_eq!(cache.flush_all(), 10);

    let mut written = disk.writes();
    written.sort_unstable();
    assert_eq!(written, (10..20).collect::<Vec<_>>());
    for sector in 10..20 {
        assert!(cache.is_cached(sector));
        assert_eq!(&disk.raw(sector)[100..116], &[sector as u8; 16]);
    }
}

#[test]
fn write_behind_worker_flushes_without_evicting() {
    init_logging();
    let disk = Arc::new(RecordingDisk::new(256));
    let cache = started(&disk, Duration::from_millis(20), false);
    cache.write(42, &[7; SECTOR_SIZE], 0);

    assert!(wait_until(PATIENCE, || disk.was_written(42)));
    assert!(wait_until(PATIENCE, || cache.dirty_slots() == 0));
    assert!(cache.is_cached(42));
    assert_eq!(disk.raw(42), [7; SECTOR_SIZE]);
    cache.shutdown();
}

#[test]
fn write_behind_picks_up_later_writes() {
    let disk = Arc::new(RecordingDisk::new(256));
    let cache = started(&disk, Duration::from_millis(20), false);
    cache.write(1, b"one", 0);
    assert!(wait_until(PATIENCE, || disk.raw(1)[..3] == *b"one"));
    cache.write(1, b"two", 0);
    assert!(wait_until(PATIENCE, || disk.raw(1)[..3] == *b"two"));
    cache.shutdown();
}

#[test]
fn read_ahead_prefetches_requested_sectors() {
    let disk = Arc::new(RecordingDisk::new(256));
    disk.write_sector(77, &[0x77; SECTOR_SIZE]);
    let cache = started(&disk, Duration::from_secs(3600), true);

    cache.request_read_ahead(77);
    assert!(wait_until(PATIENCE, || cache.is_cached(77)));
    assert_eq!(cache.pinned_slots(), 0);

    let mut out = [0u8; SECTOR_SIZE];
    cache.read(77, &mut out, 0);
    assert_eq!(out, [0x77; SECTOR_SIZE]);
    cache.shutdown();
}

#[test]
fn sequential_reads_with_read_ahead_return_the_right_bytes() {
    let disk = Arc::new(RecordingDisk::new(4096));
    let data = pattern(200 * SECTOR_SIZE + 13, 5);
    let sector = {
        let h = Harness::with_cache(disk.clone(), Arc::new(BufferCache::new(disk.clone())), 4096);
        let sector = h.create(0);
        let inode = h.inodes.open(sector).unwrap();
        inode.write_at(&data, 0).unwrap();
        h.inodes.close(inode);
        h.cache.flush_all();
        sector
    };

    let cache = started(&disk, Duration::from_millis(50), true);
    let h = Harness::with_cache(disk.clone(), cache.clone(), 4096);
    let inode = h.inodes.open(sector).unwrap();
    let mut out = vec![0u8; data.len()];
    let mut pos = 0;
    while pos < out.len() {
        let end = (pos + 1500).min(out.len());
        assert_eq!(inode.read_at(&mut out[pos..end], pos), end - pos);
        pos = end;
    }
    assert_eq!(out, data);
    assert_eq!(cache.pinned_slots(), 0);
    h.inodes.close(inode);
    cache.shutdown();
}

#[test]
fn read_ahead_is_requested_only_inside_the_file() {
    let disk = Arc::new(RecordingDisk::new(256));
    let cache = started(&disk, Duration::from_secs(3600), true);
    let h = Harness::with_cache(disk.clone(), cache.clone(), 256);
    let length = 3 * SECTOR_SIZE;
    let inode = h.inodes.open(h.create(length)).unwrap();
    let base = cache.read_ahead_requests();

    // crosses into the second sector
    assert_eq!(inode.read_at(&mut [0u8; 600], 0), 600);
    assert_eq!(cache.read_ahead_requests(), base + 1);

    // within the last sector, ending at end of file
    assert_eq!(inode.read_at(&mut [0u8; 100], length - 100), 100);
    assert_eq!(cache.read_ahead_requests(), base + 1);

    // asks for more than the file holds
    assert_eq!(inode.read_at(&mut [0u8; 500], length - 236), 236);
    assert_eq!(cache.read_ahead_requests(), base + 1);

    // second to last sector through end of file: only the last is requested
    assert_eq!(inode.read_at(&mut [0u8; 536], length - 536), 536);
    assert_eq!(cache.read_ahead_requests(), base + 2);

    // at or past the end nothing is read or requested
    assert_eq!(inode.read_at(&mut [0u8; 10], length), 0);
    assert_eq!(cache.read_ahead_requests(), base + 2);
    assert_eq!(cache.pinned_slots(), 0);

    h.inodes.close(inode);
    cache.shutdown();
}

#[test]
fn cache_without_read_ahead_ignores_requests() {
    let disk = Arc::new(RecordingDisk::new(64));
    let cache = BufferCache::new(disk);
    cache.request_read_ahead(9);
    assert_eq!(cache.read_ahead_requests(), 0);
    assert!(!cache.is_cached(9));
}

#[test]
fn shutdown_interrupts_a_sleeping_worker() {
    let disk = Arc::new(RecordingDisk::new(64));
    let cache = started(&disk, Duration::from_secs(3600), true);
    cache.write(3, b"x", 0);
    let begun = std::time::Instant::now();
    cache.shutdown();
    assert!(begun.elapsed() < PATIENCE);
    // shutdown does not flush
    assert!(disk.writes().is_empty());
    assert_eq!(cache.dirty_slots(), 1);
}

#[test]
fn image_file_round_trip() {
    init_logging();
    let path = std::env::temp_dir().join(format!("sectorfs-e2e-{}.img", std::process::id()));
    let config = CacheConfig::default();
    let data = pattern(70_000, 11);

    let file = {
        let disk: Arc<dyn BlockDevice> = Arc::new(FileDisk::create(&path, 2048).unwrap());
        let fs = FileSystem::format(disk, &config).unwrap();
        let file = fs.create(0, false, fs.root()).unwrap();
        let inode = fs.open(file).unwrap();
        assert_eq!(inode.write_at(&data, 0).unwrap(), data.len());
        fs.close(inode);
        fs.shutdown();
        file
    };

    let disk: Arc<dyn BlockDevice> = Arc::new(FileDisk::open(&path).unwrap());
    let fs = FileSystem::mount(disk, &config).unwrap();
    let inode = fs.open(file).unwrap();
    assert_eq!(inode.length(), data.len());
    let mut out = vec![0u8; data.len()];
    assert_eq!(inode.read_at(&mut out, 0), data.len());
    assert_eq!(out, data);
    fs.close(inode);

    let free = fs.free_sectors();
    fs.remove(file).unwrap();
    assert!(fs.free_sectors() > free);
    fs.shutdown();
    let _ = std::fs::remove_file(&path);
}
