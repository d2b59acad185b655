//! Ingress Buffer: the single synchronization point between the transport
//! collaborator feeding raw frames and the pipeline consuming them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{CoreError, Result};

/// One unit of audio as delivered by the transport collaborator.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Wall-clock seconds, supplied by the caller.
    pub timestamp: f64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(timestamp: f64, payload: Vec<u8>) -> Result<Self> {
        if payload.is_empty() {
            return Err(CoreError::InvalidFrame("empty payload".into()));
        }
        Ok(Self { timestamp, payload })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IngressMetrics {
    /// Every `push` call observed, whether accepted, dropped for overflow,
    /// or dropped because the buffer was already closed.
    pub frames_attempted: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    /// `frames_dropped / frames_attempted`, `0.0` before any frame arrives.
    pub drop_rate: f64,
    /// Frames currently queued, awaiting `pop`.
    pub queue_size: usize,
    /// Timestamp (caller-supplied, same units as `Frame::timestamp`) of the
    /// most recently accepted frame, if any.
    pub last_frame_ts: Option<f64>,
    pub closed: bool,
}

struct Inner {
    queue: Mutex<VecDeque<Frame>>,
    capacity: usize,
    closed: std::sync::atomic::AtomicBool,
    attempted: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    last_frame_ts: Mutex<Option<f64>>,
    notify: Notify,
}

/// Bounded FIFO of `Frame`s with drop-oldest overflow semantics and an
/// idempotent close that wakes any waiter.
#[derive(Clone)]
pub struct IngressBuffer {
    inner: Arc<Inner>,
}

impl IngressBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                closed: std::sync::atomic::AtomicBool::new(false),
                attempted: AtomicU64::new(0),
                received: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                last_frame_ts: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Non-blocking push. Silently drops (and counts) the push if the
    /// buffer is closed. On overflow, drops the oldest queued frame to make
    /// room rather than rejecting the new one.
    pub fn push(&self, frame: Frame) {
        self.inner.attempted.fetch_add(1, Ordering::Relaxed);
        if self.inner.closed.load(Ordering::Acquire) {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let ts = frame.timestamp;
        {
            let mut q = self.inner.queue.lock();
            if q.len() >= self.inner.capacity {
                q.pop_front();
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(frame);
        }
        *self.inner.last_frame_ts.lock() = Some(ts);
        self.inner.received.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_one();
    }

    /// Awaits up to `timeout` for a frame. Returns `None` on timeout or once
    /// the buffer has been drained and closed.
    pub async fn pop(&self, timeout: Duration) -> Option<Frame> {
        loop {
            if let Some(frame) = self.inner.queue.lock().pop_front() {
                return Some(frame);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            let notified = self.inner.notify.notified();
            match tokio::time::timeout(timeout, notified).await {
                Ok(()) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Idempotent. Wakes any waiter so it observes closure instead of
    /// blocking for the full timeout.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> IngressMetrics {
        let attempted = self.inner.attempted.load(Ordering::Relaxed);
        let dropped = self.inner.dropped.load(Ordering::Relaxed);
        let drop_rate = if attempted == 0 {
            0.0
        } else {
            dropped as f64 / attempted as f64
        };
        IngressMetrics {
            frames_attempted: attempted,
            frames_received: self.inner.received.load(Ordering::Relaxed),
            frames_dropped: dropped,
            drop_rate,
            queue_size: self.inner.queue.lock().len(),
            last_frame_ts: *self.inner.last_frame_ts.lock(),
            closed: self.inner.closed.load(Ordering::Acquire),
        }
    }
}
