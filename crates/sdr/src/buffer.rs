// Copyright 2025-2026 CEMAXECUTER LLC

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct BufferState<T> {
    queue: VecDeque<Vec<T>>,
    qlen: usize,
    end: bool,
}

/// Bounded streaming buffer between producer and consumer threads.
///
/// A FIFO of sample blocks with a running count of queued samples and
/// explicit end-of-stream signaling. Blocks are moved, never copied:
/// ownership transfers fully on push/pull. The buffer itself enforces
/// no upper bound; overflow detection is the consumer's business via
/// `queued_samples()`.
pub struct DataBuffer<T> {
    state: Mutex<BufferState<T>>,
    data_avail: Condvar,
    fill_reached: Condvar,
}

impl<T> DataBuffer<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                queue: VecDeque::new(),
                qlen: 0,
                end: false,
            }),
            data_avail: Condvar::new(),
            fill_reached: Condvar::new(),
        }
    }

    /// Append a block to the queue and wake waiters.
    ///
    /// Empty blocks are ignored (an empty vector is the stream-end
    /// sentinel on the pull side). Once end-of-stream has been signaled
    /// this is a silent no-op.
    pub fn push(&self, samples: Vec<T>) {
        if samples.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.end {
            return;
        }
        state.qlen += samples.len();
        state.queue.push_back(samples);
        drop(state);
        self.data_avail.notify_one();
        self.fill_reached.notify_all();
    }

    /// Signal that no further blocks will ever be pushed. Idempotent.
    pub fn push_end(&self) {
        let mut state = self.state.lock().unwrap();
        state.end = true;
        drop(state);
        self.data_avail.notify_all();
        self.fill_reached.notify_all();
    }

    /// Remove and return the head block, waiting for data if necessary.
    ///
    /// Returns an empty vector once the queue is drained and
    /// end-of-stream is set. That empty vector is the sole termination
    /// signal for consumers; further calls keep returning empty.
    pub fn pull(&self) -> Vec<T> {
        let mut state = self.state.lock().unwrap();
        while state.queue.is_empty() && !state.end {
            state = self.data_avail.wait(state).unwrap();
        }
        match state.queue.pop_front() {
            Some(block) => {
                state.qlen -= block.len();
                block
            }
            None => Vec::new(),
        }
    }

    /// True once the queue is empty and end-of-stream has been signaled.
    pub fn pull_end_reached(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.end && state.queue.is_empty()
    }

    /// Snapshot of the total queued sample count (sum of block lengths).
    /// Advisory only: it may be stale the instant it is read.
    pub fn queued_samples(&self) -> usize {
        self.state.lock().unwrap().qlen
    }

    /// Block until the queued sample count reaches `threshold`, or
    /// end-of-stream is set.
    pub fn wait_buffer_fill(&self, threshold: usize) {
        let mut state = self.state.lock().unwrap();
        while state.qlen < threshold && !state.end {
            state = self.fill_reached.wait(state).unwrap();
        }
    }
}

impl<T> Default for DataBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let buf = DataBuffer::new();
        buf.push(vec![1i16, 2]);
        buf.push(vec![3, 4, 5]);
        buf.push(vec![6]);
        assert_eq!(buf.queued_samples(), 6);

        assert_eq!(buf.pull(), vec![1, 2]);
        assert_eq!(buf.pull(), vec![3, 4, 5]);
        assert_eq!(buf.queued_samples(), 1);
        assert_eq!(buf.pull(), vec![6]);
        assert_eq!(buf.queued_samples(), 0);
    }

    #[test]
    fn test_pull_after_end_is_terminal_and_idempotent() {
        let buf = DataBuffer::new();
        buf.push(vec![1u8]);
        buf.push_end();
        buf.push_end(); // idempotent

        // Remaining blocks drain before stream end is reported.
        assert_eq!(buf.pull(), vec![1]);
        assert!(buf.pull_end_reached());
        assert!(buf.pull().is_empty());
        assert!(buf.pull().is_empty());
    }

    #[test]
    fn test_push_after_end_is_noop() {
        let buf = DataBuffer::new();
        buf.push_end();
        buf.push(vec![1u8, 2, 3]);
        assert_eq!(buf.queued_samples(), 0);
        assert!(buf.pull().is_empty());
    }

    #[test]
    fn test_empty_block_push_ignored() {
        let buf: DataBuffer<u8> = DataBuffer::new();
        buf.push(Vec::new());
        assert_eq!(buf.queued_samples(), 0);
        assert!(!buf.pull_end_reached());
    }

    #[test]
    fn test_pull_blocks_until_push() {
        let buf = Arc::new(DataBuffer::new());
        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                buf.push(vec![42u8]);
            })
        };
        assert_eq!(buf.pull(), vec![42]);
        producer.join().unwrap();
    }

    #[test]
    fn test_push_end_unblocks_pull() {
        let buf: Arc<DataBuffer<u8>> = Arc::new(DataBuffer::new());
        let consumer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.pull())
        };
        thread::sleep(Duration::from_millis(50));
        buf.push_end();
        assert!(consumer.join().unwrap().is_empty());
    }

    #[test]
    fn test_wait_buffer_fill_threshold() {
        let buf = Arc::new(DataBuffer::new());
        let waiter = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                buf.wait_buffer_fill(5);
                buf.queued_samples()
            })
        };
        buf.push(vec![1u8, 2]);
        thread::sleep(Duration::from_millis(20));
        buf.push(vec![3, 4, 5]);
        let seen = waiter.join().unwrap();
        assert!(seen >= 5, "waiter returned with only {} samples", seen);
    }

    #[test]
    fn test_wait_buffer_fill_returns_on_end() {
        let buf: Arc<DataBuffer<u8>> = Arc::new(DataBuffer::new());
        let waiter = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.wait_buffer_fill(1_000_000))
        };
        thread::sleep(Duration::from_millis(20));
        buf.push_end();
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_buffer_fill_immediate_when_already_ended() {
        let buf: DataBuffer<u8> = DataBuffer::new();
        buf.push_end();
        // Must not block regardless of threshold.
        buf.wait_buffer_fill(usize::MAX);
    }

    #[test]
    fn test_no_loss_across_threads() {
        let buf = Arc::new(DataBuffer::new());
        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for i in 0..100u32 {
                    buf.push(vec![i; 16]);
                }
                buf.push_end();
            })
        };
        let mut blocks = 0;
        loop {
            let block = buf.pull();
            if block.is_empty() {
                break;
            }
            assert_eq!(block, vec![blocks; 16]);
            blocks += 1;
        }
        assert_eq!(blocks, 100);
        producer.join().unwrap();
    }
}
