//! Fixed-capacity channels between the scheduler and the worker.
//!
//! Thin wrapper over `std::sync::mpsc::sync_channel` that also tracks how
//! many items are queued, so callers can observe occupancy without taking an
//! item. Sending moves the value into the channel: the sender gives up the
//! descriptor and every buffer it owns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvError, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;

/// Why a non-blocking send failed. The rejected value is handed back.
#[derive(Debug)]
pub enum SendRejected<T> {
    Full(T),
    Disconnected(T),
}

pub struct BoundedSender<T> {
    inner: SyncSender<T>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

pub struct BoundedReceiver<T> {
    inner: Receiver<T>,
    depth: Arc<AtomicUsize>,
}

/// Create a channel holding at most `capacity` items.
pub fn bounded<T>(capacity: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    (
        BoundedSender {
            inner: tx,
            depth: Arc::clone(&depth),
            capacity,
        },
        BoundedReceiver { inner: rx, depth },
    )
}

impl<T> BoundedSender<T> {
    /// Enqueue without waiting.
    pub fn try_send(&self, value: T) -> Result<(), SendRejected<T>> {
        // Count before the item becomes visible so the receiver can never
        // decrement below zero.
        self.depth.fetch_add(1, Ordering::SeqCst);
        match self.inner.try_send(value) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Err(match e {
                    TrySendError::Full(v) => SendRejected::Full(v),
                    TrySendError::Disconnected(v) => SendRejected::Disconnected(v),
                })
            }
        }
    }

    /// Enqueue, waiting for space. Fails only if the receiver is gone.
    pub fn send(&self, value: T) -> Result<(), T> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.inner.send(value).map_err(|e| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            e.0
        })
    }

    /// Items queued, plus any sender currently blocked in `send`.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> BoundedReceiver<T> {
    /// Wait for the next item. Returns `Err` once every sender is dropped
    /// and the queue is empty.
    pub fn recv(&self) -> Result<T, RecvError> {
        let value = self.inner.recv()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Ok(value)
    }

    /// Take the next item if one is ready.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let value = self.inner.try_recv()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
