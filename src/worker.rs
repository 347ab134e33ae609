//! Background workers of the buffer cache.
//!
//! Both hold only a weak reference to the cache: they stop when told to, or
//! once the cache itself is gone.

use super::*;
use block_cache::BufferCache;

use log::{debug, info, trace};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct QueueState {
    pending: VecDeque<SectorId>,
    closed: bool,
}

/// Sectors waiting to be prefetched. The queue length doubles as the wake-up count.
pub struct ReadAheadQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl ReadAheadQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn push(&self, sector: SectorId) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.pending.push_back(sector);
        self.ready.notify_one();
    }

    /// Block until work arrives and take all of it. `None` once closed.
    pub fn drain(&self) -> Option<Vec<SectorId>> {
        let mut state = self.state.lock().unwrap();
        while state.pending.is_empty() && !state.closed {
            state = self.ready.wait(state).unwrap();
        }
        if state.closed {
            return None;
        }
        Some(state.pending.drain(..).collect())
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.pending.clear();
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interruptible sleep shared with the write-behind worker.
pub struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
        self.cv.notify_all();
    }

    /// Sleep for `dur` or until stopped. Returns true when stopped.
    pub fn sleep(&self, dur: Duration) -> bool {
        let stopped = self.stopped.lock().unwrap();
        let (stopped, _) = self
            .cv
            .wait_timeout_while(stopped, dur, |stopped| !*stopped)
            .unwrap();
        *stopped
    }
}

/// Periodically write every dirty slot back, without evicting anything.
pub fn spawn_write_behind(
    cache: Weak<BufferCache>,
    stop: Arc<StopSignal>,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("write-behind".into())
        .spawn(move || {
            info!("write-behind started, interval {interval:?}");
            while !stop.sleep(interval) {
                let Some(cache) = cache.upgrade() else { break };
                let flushed = cache.write_behind();
                if flushed > 0 {
                    debug!("write-behind flushed {flushed} slots");
                }
            }
            info!("write-behind stopped");
        })?;
    Ok(handle)
}

/// Drain the read-ahead queue into the cache whenever it is signalled.
pub fn spawn_read_ahead(
    cache: Weak<BufferCache>,
    queue: Arc<ReadAheadQueue>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("read-ahead".into())
        .spawn(move || {
            info!("read-ahead started");
            while let Some(batch) = queue.drain() {
                let Some(cache) = cache.upgrade() else { break };
                for sector in batch {
                    trace!("read-ahead sector {sector}");
                    cache.prefetch(sector);
                }
            }
            info!("read-ahead stopped");
        })?;
    Ok(handle)
}
