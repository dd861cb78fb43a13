//! Async primitives shared by the two directional pipelines.
//!
//! [`ByteQueue`] is the byte pipe the endpoints push PCM through, and
//! [`PttFlag`] is the latching keying signal each ingress path publishes for
//! the opposite egress path to observe.

use std::collections::VecDeque;

use tokio::sync::{watch, Mutex, Notify};

/// Default cap on buffered audio: four seconds of 8 kHz 16-bit mono.
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// A FIFO byte pipe with coalescing read-up-to-N semantics.
///
/// Writes append atomically and wake the reader; reads block while the
/// buffer is empty and then return between 1 and `n` bytes in insertion
/// order, leaving any excess buffered for the next read. No framing is
/// enforced at this layer.
///
/// The queue tolerates multiple concurrent writers but expects a single
/// logical reader. Audio written past the capacity displaces the oldest
/// buffered bytes; stale audio is worthless to a real-time bridge.
pub struct ByteQueue {
    buffer: Mutex<VecDeque<u8>>,
    capacity: usize,
    data_available: Notify,
}

impl ByteQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            capacity,
            data_available: Notify::new(),
        }
    }

    /// Appends `data` and signals the reader.
    pub async fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let mut buffer = self.buffer.lock().await;
        buffer.extend(data);

        let excess = buffer.len().saturating_sub(self.capacity);
        if excess > 0 {
            buffer.drain(..excess);
        }

        drop(buffer);
        self.data_available.notify_one();
    }

    /// Returns between 1 and `n` buffered bytes, blocking while empty.
    pub async fn read(&self, n: usize) -> Vec<u8> {
        loop {
            let notified = self.data_available.notified();

            {
                let mut buffer = self.buffer.lock().await;
                if !buffer.is_empty() {
                    let take = n.min(buffer.len());
                    return buffer.drain(..take).collect();
                }
            }

            // Woken by the next write; spurious wakeups re-check above.
            notified.await;
        }
    }

    /// Number of bytes currently buffered.
    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.lock().await.is_empty()
    }
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A latching binary level with notify-on-change semantics.
///
/// Each flag is written only by the ingress path of its side and read by the
/// opposite side's egress path, which may either sample ([`Self::is_set`]) or
/// await a level ([`Self::wait_set`], [`Self::wait_clear`]).
pub struct PttFlag {
    level: watch::Sender<bool>,
}

impl PttFlag {
    #[must_use]
    pub fn new() -> Self {
        let (level, _) = watch::channel(false);

        Self {
            level,
        }
    }

    pub fn set(&self) {
        self.level.send_replace(true);
    }

    pub fn clear(&self) {
        self.level.send_replace(false);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.level.borrow()
    }

    /// Completes once the flag is set; immediately if it already is.
    pub async fn wait_set(&self) {
        let mut rx = self.level.subscribe();
        let _ = rx.wait_for(|level| *level).await;
    }

    /// Completes once the flag is clear; immediately if it already is.
    pub async fn wait_clear(&self) {
        let mut rx = self.level.subscribe();
        let _ = rx.wait_for(|level| !*level).await;
    }
}

impl Default for PttFlag {
    fn default() -> Self {
        Self::new()
    }
}
