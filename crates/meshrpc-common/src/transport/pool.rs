//! Frame buffer pool
//!
//! Frames are always exactly one profile size, so buffers can be handed back and
//! reused instead of being reallocated for every read and write.

use parking_lot::Mutex;

/// Default number of idle buffers kept per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Pool of zeroed, fixed-size frame buffers.
#[derive(Debug)]
pub struct BufferPool {
    frame_size: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(frame_size: usize, capacity: usize) -> Self {
        Self {
            frame_size,
            capacity,
            free: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Takes a zeroed buffer of `frame_size` bytes, allocating if the pool is empty.
    pub fn acquire(&self) -> Vec<u8> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.frame_size])
    }

    /// Zeroes a buffer and returns it to the pool.
    ///
    /// Buffers of the wrong size, or beyond the pool's capacity, are dropped.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.len() != self.frame_size {
            return;
        }
        buf.fill(0);
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// Number of idle buffers.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_buffers_come_back_zeroed() {
        let pool = BufferPool::new(8, 2);
        let mut buf = pool.acquire();
        buf.copy_from_slice(&[9; 8]);
        pool.release(buf);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.acquire(), vec![0; 8]);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(4, 1);
        pool.release(vec![0; 4]);
        pool.release(vec![0; 4]);
        pool.release(vec![0; 3]);
        assert_eq!(pool.available(), 1);
    }
}
