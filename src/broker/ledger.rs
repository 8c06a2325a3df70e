use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::errors::{RelayError, Result};

/// Tracks delivery tags that are in flight and awaiting settlement.
///
/// The producer opens a tag before every publish and settles it once the
/// broker confirms; the consumer opens a tag when a message is handed out and
/// settles it on acknowledgment. Settling a tag the ledger does not know, or
/// settling the same tag twice, is a protocol violation rather than a
/// retryable fault. Cumulative ("multiple") settlement is unsupported and
/// fails loudly.
///
/// Access is mutex-guarded: broker confirm callbacks can be delivered
/// interleaved with event-loop processing even under a single-threaded
/// runtime.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    open: BTreeSet<u64>,
    next_tag: u64,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a broker-assigned tag as outstanding.
    pub fn open(&self, tag: u64) -> Result<()> {
        let mut inner = self.lock();
        if !inner.open.insert(tag) {
            return Err(RelayError::ProtocolViolation(format!(
                "delivery tag {tag} is already outstanding"
            )));
        }
        Ok(())
    }

    /// Allocate the next publish sequence tag and record it as outstanding.
    ///
    /// Mirrors the channel's publish sequence in confirm mode: 1, 2, 3, ...
    pub fn open_next(&self) -> u64 {
        let mut inner = self.lock();
        inner.next_tag += 1;
        let tag = inner.next_tag;
        inner.open.insert(tag);
        tag
    }

    /// Settle an outstanding tag.
    pub fn settle(&self, tag: u64, multiple: bool) -> Result<()> {
        if multiple {
            return Err(RelayError::ProtocolViolation(format!(
                "cumulative acknowledgment up to tag {tag} is unsupported"
            )));
        }
        let mut inner = self.lock();
        if !inner.open.remove(&tag) {
            return Err(RelayError::ProtocolViolation(format!(
                "delivery tag {tag} is not outstanding"
            )));
        }
        Ok(())
    }

    pub fn contains(&self, tag: u64) -> bool {
        self.lock().open.contains(&tag)
    }

    pub fn outstanding(&self) -> usize {
        self.lock().open.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned ledger would mean a panic mid-mutation; the sets involved
        // are still structurally sound, so keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
