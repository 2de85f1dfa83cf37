// SPDX-License-Identifier: Apache-2.0

//! Bounded channel used to hand records from the tail thread to a consumer.
//! The tail loop runs on a plain OS thread, so only blocking operations are
//! exposed.

use std::time::Duration;

use flume::{Receiver, Sender};
use thiserror::Error;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SendError {
    #[error("channel disconnected")]
    Disconnected,
}

impl<T> BoundedSender<T> {
    /// Blocking send - blocks until there is capacity in the channel.
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        match self.tx.send(item) {
            Ok(()) => Ok(()),
            Err(_e) => Err(SendError::Disconnected), // receiver closed
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Blocking receive - blocks until an item is available.
    /// Returns None once every sender is gone and the channel is empty.
    pub fn recv_blocking(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Non-blocking receive - returns immediately.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive with timeout.
    /// Returns None if timeout expires or channel is disconnected.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Everything currently queued, without blocking
    pub fn drain(&self) -> Vec<T> {
        self.rx.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    let sender = BoundedSender { tx };
    let receiver = BoundedReceiver { rx };

    (sender, receiver)
}
