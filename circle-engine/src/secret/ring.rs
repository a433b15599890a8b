//! Bounded retention of per-epoch secrets.
//!
//! A group keeps the secrets of its current epoch plus a small window of
//! previous epochs, so that application messages delayed across a commit
//! can still be read. Anything older is dropped, and dropping wipes it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::buffer::SecretBytes;

/// Default number of past epochs whose secrets are retained.
///
/// A secret for epoch `e` is wiped once the current epoch exceeds `e + 2`.
pub const DEFAULT_EXPORTER_RETENTION_EPOCHS: u64 = 2;

/// Secrets scoped to one epoch.
pub trait EpochScoped {
    /// The epoch these secrets belong to.
    fn epoch(&self) -> u64;

    /// Explicit copy, used when staging a successor state.
    #[must_use]
    fn duplicate(&self) -> Self;
}

/// The MLS exporter secret of one epoch, keying kind 445 content.
#[derive(Debug)]
pub struct ExporterSecret {
    epoch: u64,
    secret: SecretBytes,
}

impl ExporterSecret {
    /// Wraps the exporter secret of `epoch`.
    #[must_use]
    pub const fn new(epoch: u64, secret: SecretBytes) -> Self {
        Self { epoch, secret }
    }

    /// The secret bytes.
    #[must_use]
    pub const fn secret(&self) -> &SecretBytes {
        &self.secret
    }
}

impl EpochScoped for ExporterSecret {
    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn duplicate(&self) -> Self {
        Self {
            epoch: self.epoch,
            secret: self.secret.duplicate(),
        }
    }
}

/// The current epoch's secrets plus a bounded window of older ones.
#[derive(Debug, Serialize, Deserialize)]
pub struct EpochSecretRing<T> {
    retention: u64,
    current: T,
    /// Newest first.
    retained: VecDeque<T>,
}

impl<T: EpochScoped> EpochSecretRing<T> {
    /// Starts a ring at `current`.
    pub fn new(retention: u64, current: T) -> Self {
        Self {
            retention,
            current,
            retained: VecDeque::new(),
        }
    }

    /// The current epoch's secrets.
    pub const fn current(&self) -> &T {
        &self.current
    }

    /// The configured retention window, in epochs.
    pub const fn retention(&self) -> u64 {
        self.retention
    }

    /// Looks up secrets for `epoch`, if still retained.
    pub fn get(&self, epoch: u64) -> Option<&T> {
        self.iter_newest_first().find(|entry| entry.epoch() == epoch)
    }

    /// Iterates over all retained secrets, current epoch first.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &T> {
        std::iter::once(&self.current).chain(self.retained.iter())
    }

    /// Rebuilds a ring from stored entries in any order. Returns `None`
    /// when `entries` is empty.
    pub fn from_entries(retention: u64, mut entries: Vec<T>) -> Option<Self> {
        entries.sort_by_key(EpochScoped::epoch);
        let mut entries = entries.into_iter();
        let mut ring = Self::new(retention, entries.next()?);
        for entry in entries {
            ring.advance(entry);
        }
        Some(ring)
    }

    /// Installs `next` as current and erases secrets past the window.
    pub fn advance(&mut self, next: T) {
        let previous = std::mem::replace(&mut self.current, next);
        self.retained.push_front(previous);
        self.prune();
    }

    /// Explicit deep copy.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            retention: self.retention,
            current: self.current.duplicate(),
            retained: self.retained.iter().map(EpochScoped::duplicate).collect(),
        }
    }

    /// Returns a successor ring without touching this one.
    #[must_use]
    pub fn advanced(&self, next: T) -> Self {
        let mut ring = self.duplicate();
        ring.advance(next);
        ring
    }

    fn prune(&mut self) {
        let current = self.current.epoch();
        while self
            .retained
            .back()
            .is_some_and(|oldest| current.saturating_sub(oldest.epoch()) > self.retention)
        {
            self.retained.pop_back();
        }
    }
}
