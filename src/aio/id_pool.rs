use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Why a borrow was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowError {
    /// The pool is shutting down.
    Closed,
    /// Every id is in flight.
    Exhausted,
}

#[derive(Debug)]
struct PoolState {
    free: VecDeque<u32>,
    borrowed: Vec<bool>,
    closed: bool,
}

/// Fixed-capacity set of request ids in `[0, capacity)`.
///
/// An id handed out by [`borrow`](ReqIdPool::borrow) is not handed out again
/// until it comes back through [`give_back`](ReqIdPool::give_back).
#[derive(Debug)]
pub struct ReqIdPool {
    state: Mutex<PoolState>,
    drained: Condvar,
    capacity: usize,
}

impl ReqIdPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                free: (0..capacity as u32).collect(),
                borrowed: vec![false; capacity],
                closed: false,
            }),
            drained: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn borrow(&self) -> Result<u32, BorrowError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BorrowError::Closed);
        }
        let id = state.free.pop_front().ok_or(BorrowError::Exhausted)?;
        state.borrowed[id as usize] = true;
        Ok(id)
    }

    /// Return a borrowed id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range or not currently borrowed.
    pub fn give_back(&self, id: u32) {
        let mut state = self.lock();
        match state.borrowed.get_mut(id as usize) {
            Some(borrowed) if *borrowed => *borrowed = false,
            Some(_) => panic!("request id {} returned while not in flight", id),
            None => panic!("request id {} out of range", id),
        }
        state.free.push_back(id);
        if state.free.len() == self.capacity {
            self.drained.notify_all();
        }
    }

    pub fn is_borrowed(&self, id: u32) -> bool {
        self.lock()
            .borrowed
            .get(id as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Refuse further borrows. Outstanding ids can still be returned.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait until every id has been returned or `timeout` elapses. Returns the
    /// number still in flight.
    pub fn wait_clear(&self, timeout: Option<Duration>) -> usize {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        while state.free.len() < self.capacity {
            state = match deadline {
                None => self.drained.wait(state).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    self.drained
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
        self.capacity - state.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_borrow_until_exhausted() {
        let pool = ReqIdPool::new(4);
        let ids: HashSet<u32> = (0..4).map(|_| pool.borrow().unwrap()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(pool.borrow(), Err(BorrowError::Exhausted));
        assert_eq!(pool.in_flight(), 4);
    }

    #[test]
    fn test_returned_id_is_reusable() {
        let pool = ReqIdPool::new(1);
        let id = pool.borrow().unwrap();
        assert!(pool.is_borrowed(id));
        pool.give_back(id);
        assert!(!pool.is_borrowed(id));
        assert_eq!(pool.borrow().unwrap(), id);
    }

    #[test]
    fn test_closed_pool_refuses_borrow() {
        let pool = ReqIdPool::new(2);
        let id = pool.borrow().unwrap();
        pool.close();
        assert_eq!(pool.borrow(), Err(BorrowError::Closed));
        pool.give_back(id);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    #[should_panic(expected = "not in flight")]
    fn test_double_return_panics() {
        let pool = ReqIdPool::new(2);
        let id = pool.borrow().unwrap();
        pool.give_back(id);
        pool.give_back(id);
    }

    #[test]
    fn test_wait_clear_times_out_with_remaining() {
        let pool = ReqIdPool::new(3);
        let _a = pool.borrow().unwrap();
        let _b = pool.borrow().unwrap();
        assert_eq!(pool.wait_clear(Some(Duration::from_millis(20))), 2);
    }

    #[test]
    fn test_wait_clear_wakes_on_last_return() {
        let pool = Arc::new(ReqIdPool::new(8));
        let ids: Vec<u32> = (0..8).map(|_| pool.borrow().unwrap()).collect();

        let returner = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for id in ids {
                    thread::sleep(Duration::from_millis(1));
                    pool.give_back(id);
                }
            })
        };

        assert_eq!(pool.wait_clear(None), 0);
        returner.join().unwrap();
    }

    #[test]
    fn test_concurrent_borrowers_never_share_ids() {
        let pool = Arc::new(ReqIdPool::new(64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || (0..8).map(|_| pool.borrow().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {} issued twice", id);
            }
        }
        assert_eq!(pool.available(), 0);
    }
}
