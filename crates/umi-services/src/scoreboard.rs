//! Response scoreboard.
//!
//! Expectations are queued per source id (the requester's return address).
//! An observed response must match the oldest outstanding expectation for
//! its source id; anything else is fatal to the monitor.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use umi_core::Transaction;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoreboardError {
    #[error("unexpected packet for source {source_id:#x}: {packet}")]
    UnexpectedPacket { source_id: u64, packet: String },

    #[error("sequence mismatch for source {source_id:#x}: expected {expected}, got {actual}")]
    SequenceMismatch {
        source_id: u64,
        expected: String,
        actual: String,
    },
}

/// Shared between monitor tasks; clones see the same queues.
#[derive(Clone, Default)]
pub struct Scoreboard {
    // source id -> expectations in issue order
    expected: Arc<DashMap<u64, VecDeque<Transaction>>>,
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `txn` as the next response expected by `source_id`.
    pub fn expect(&self, source_id: u64, txn: Transaction) {
        self.expected.entry(source_id).or_default().push_back(txn);
    }

    /// Match a response against the oldest expectation of its destination.
    pub fn observe(&self, actual: &Transaction) -> Result<(), ScoreboardError> {
        self.observe_for(actual.dstaddr, actual)
    }

    /// Match `actual` against the oldest expectation of `source_id`.
    ///
    /// A mismatch leaves the expectation queued.
    pub fn observe_for(&self, source_id: u64, actual: &Transaction) -> Result<(), ScoreboardError> {
        let mut queue = self.expected.get_mut(&source_id).ok_or_else(|| {
            ScoreboardError::UnexpectedPacket {
                source_id,
                packet: actual.to_string(),
            }
        })?;
        let Some(front) = queue.front() else {
            return Err(ScoreboardError::UnexpectedPacket {
                source_id,
                packet: actual.to_string(),
            });
        };
        if front != actual {
            return Err(ScoreboardError::SequenceMismatch {
                source_id,
                expected: front.to_string(),
                actual: actual.to_string(),
            });
        }
        queue.pop_front();
        tracing::trace!(
            source_id,
            trace_id = &hex::encode(actual.digest())[..16],
            "response matched"
        );
        Ok(())
    }

    /// Outstanding expectations for one source id.
    pub fn outstanding(&self, source_id: u64) -> usize {
        self.expected.get(&source_id).map(|q| q.len()).unwrap_or(0)
    }

    /// True when every expectation has been observed.
    pub fn is_drained(&self) -> bool {
        self.expected.iter().all(|entry| entry.value().is_empty())
    }
}
