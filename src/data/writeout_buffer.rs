//! Writeout buffer: turns out-of-order digi production into a time-ordered stream.
//!
//! Digis enter with a [`ValidityInterval`]. In pass-through mode they leave again
//! immediately. In time-ordered mode they are held until the watermark reaches their
//! validity time and are then released in `(validity, insertion order)` order.
//!
//! # State per key
//!
//! ```text
//! Empty -> Buffered -> Released
//! Empty -> Dropped              (validity already behind the watermark)
//! ```
//!
//! A second digi with a key that is still buffered is merged into the buffered one.
//! Once a key has been released a later digi with the same key starts a new lifecycle.

use crate::digi::{Digi, DigiKey, ValidityInterval};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace, warn};

/// Outcome of [`WriteoutBuffer::insert`].
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    /// Held until its validity time
    Buffered,
    /// Combined with a digi already buffered under the same key
    Merged,
    /// Pass-through mode: ready for the writer right away
    Released(Digi),
    /// Validity time already behind the watermark; discarded
    Dropped,
}

/// Counters exposed for monitoring and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// Digis offered to `insert`
    pub inserted: u64,
    /// Digis folded into an already buffered digi
    pub merged: u64,
    /// Digis handed back for writing
    pub released: u64,
    /// Late digis discarded
    pub dropped: u64,
}

/// Release order: validity time, then insertion sequence.
#[derive(Debug, Clone, Copy)]
struct ReleaseOrder {
    validity: f64,
    seq: u64,
}

impl PartialEq for ReleaseOrder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseOrder {}

impl PartialOrd for ReleaseOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.validity.total_cmp(&other.validity) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            other_ord => other_ord,
        }
    }
}

#[derive(Debug)]
struct BufferedDigi {
    digi: Digi,
    interval: ValidityInterval,
    order: ReleaseOrder,
}

/// Key-indexed, validity-ordered digi store.
#[derive(Debug, Default)]
pub struct WriteoutBuffer {
    time_ordered: bool,
    watermark: f64,
    next_seq: u64,
    entries: HashMap<DigiKey, BufferedDigi>,
    queue: BTreeMap<ReleaseOrder, DigiKey>,
    stats: BufferStats,
}

impl WriteoutBuffer {
    /// Pass-through buffer with the watermark at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects pass-through (`false`) or validity-ordered (`true`) release.
    ///
    /// Switching to pass-through while digis are held does not release them; they
    /// still leave through [`advance_watermark`](Self::advance_watermark) or
    /// [`flush_all`](Self::flush_all).
    pub fn configure(&mut self, time_ordered: bool) {
        debug!(time_ordered, "writeout buffer configured");
        self.time_ordered = time_ordered;
    }

    /// Latest time passed to [`advance_watermark`](Self::advance_watermark).
    pub fn watermark(&self) -> f64 {
        self.watermark
    }

    /// Digis currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counters since construction.
    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Number of late arrivals discarded so far.
    pub fn dropped_count(&self) -> u64 {
        self.stats.dropped
    }

    /// Offers a digi to the buffer.
    pub fn insert(&mut self, digi: Digi, interval: ValidityInterval) -> Insertion {
        self.stats.inserted += 1;

        if !self.time_ordered {
            self.stats.released += 1;
            return Insertion::Released(digi);
        }

        if interval.validity() < self.watermark {
            self.stats.dropped += 1;
            warn!(
                detector_id = digi.detector_id,
                col = digi.col,
                row = digi.row,
                validity = interval.validity(),
                watermark = self.watermark,
                dropped = self.stats.dropped,
                "dropping late digi: validity time already passed"
            );
            return Insertion::Dropped;
        }

        let key = digi.key();
        if let Some(existing) = self.entries.get_mut(&key) {
            self.queue.remove(&existing.order);
            existing.digi.merge(digi);
            existing.interval = existing.interval.union(&interval);
            existing.order.validity = existing.interval.validity();
            self.queue.insert(existing.order, key);
            self.stats.merged += 1;
            trace!(?key, validity = existing.order.validity, "merged digi");
            return Insertion::Merged;
        }

        let order = ReleaseOrder {
            validity: interval.validity(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queue.insert(order, key);
        self.entries.insert(
            key,
            BufferedDigi {
                digi,
                interval,
                order,
            },
        );
        Insertion::Buffered
    }

    /// Moves the watermark forward and releases every digi with validity <= watermark.
    ///
    /// The watermark never moves backwards; an older `time` leaves it unchanged but
    /// still releases whatever is due.
    pub fn advance_watermark(&mut self, time: f64) -> Vec<Digi> {
        if time >= self.watermark {
            self.watermark = time;
        } else {
            debug!(
                requested = time,
                watermark = self.watermark,
                "watermark cannot move backwards"
            );
        }

        let mut released = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().validity > self.watermark {
                break;
            }
            let key = entry.remove();
            if let Some(buffered) = self.entries.remove(&key) {
                released.push(buffered.digi);
            }
        }
        self.stats.released += released.len() as u64;
        if !released.is_empty() {
            debug!(
                watermark = self.watermark,
                released = released.len(),
                remaining = self.entries.len(),
                "released digis"
            );
        }
        released
    }

    /// Releases everything still held, in release order, regardless of watermark.
    pub fn flush_all(&mut self) -> Vec<Digi> {
        let queue = std::mem::take(&mut self.queue);
        let mut released = Vec::with_capacity(queue.len());
        for key in queue.into_values() {
            if let Some(buffered) = self.entries.remove(&key) {
                released.push(buffered.digi);
            }
        }
        self.stats.released += released.len() as u64;
        debug!(released = released.len(), "flushed writeout buffer");
        released
    }
}
