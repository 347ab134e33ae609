use std::sync::{Condvar, Mutex};

/// Counting semaphore. Unlike a mutex guard, a permit may be released by a
/// different thread than the one that took it.
pub struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    /// P
    pub fn down(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.cv.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    /// V
    pub fn up(&self) {
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        self.cv.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn permit_crosses_threads() {
        let sem = Arc::new(Semaphore::new(1));
        sem.down();
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || {
                sem.down();
                sem.up();
            })
        };
        let releaser = {
            let sem = sem.clone();
            thread::spawn(move || sem.up())
        };
        releaser.join().unwrap();
        waiter.join().unwrap();
        sem.down();
    }
}
