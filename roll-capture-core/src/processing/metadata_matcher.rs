use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::resource_gate::{AdmittedFrame, ResourceGate};
use crate::models::frame::{CaptureMetadata, Timestamp};

/// Identifier of a matched pair at the codec boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairId(pub u64);

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pair#{}", self.0)
    }
}

/// A sensor buffer joined with the metadata that carries the same timestamp.
#[derive(Debug)]
pub struct MatchedPair {
    id: PairId,
    frame: AdmittedFrame,
    metadata: CaptureMetadata,
}

impl MatchedPair {
    pub fn id(&self) -> PairId {
        self.id
    }

    pub fn frame(&self) -> &AdmittedFrame {
        &self.frame
    }

    pub fn metadata(&self) -> &CaptureMetadata {
        &self.metadata
    }

    pub fn timestamp(&self) -> Timestamp {
        self.metadata.timestamp
    }

    /// Release the buffer and its gate token. The metadata is returned to the caller.
    pub fn release(self, gate: &ResourceGate) -> CaptureMetadata {
        self.frame.release(gate);
        self.metadata
    }
}

/// Result of looking up metadata for a buffer.
#[derive(Debug)]
pub enum MatchOutcome {
    Matched(MatchedPair),
    /// Metadata for this buffer can no longer arrive; release the frame.
    Obsolete(AdmittedFrame),
    /// Metadata may still arrive; hold the frame and retry later.
    Unmatched(AdmittedFrame),
}

/// Correlates buffers with metadata records by exact timestamp.
///
/// Unmatched metadata waits in an insertion-ordered pending list. Relies on
/// metadata timestamps being monotonic: once a newer record is pending, an
/// older buffer without an exact match is declared obsolete.
#[derive(Debug, Default)]
pub struct MetadataMatcher {
    pending: Mutex<VecDeque<CaptureMetadata>>,
    next_pair: AtomicU64,
}

impl MetadataMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_metadata(&self, metadata: CaptureMetadata) {
        self.pending.lock().push_back(metadata);
    }

    pub fn try_match(&self, frame: AdmittedFrame) -> MatchOutcome {
        let timestamp = frame.timestamp();
        let mut obsolete = false;

        let found = {
            let mut pending = self.pending.lock();
            let mut position = None;
            for (index, meta) in pending.iter().enumerate() {
                if meta.timestamp == timestamp {
                    position = Some(index);
                    break;
                } else if meta.timestamp > timestamp {
                    obsolete = true;
                }
            }
            position.and_then(|index| pending.remove(index))
        };

        match found {
            Some(metadata) => MatchOutcome::Matched(MatchedPair {
                id: PairId(self.next_pair.fetch_add(1, Ordering::Relaxed)),
                frame,
                metadata,
            }),
            None if obsolete => MatchOutcome::Obsolete(frame),
            None => MatchOutcome::Unmatched(frame),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drop all pending metadata. Returns how many records were discarded.
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let discarded = pending.len();
        pending.clear();
        discarded
    }
}
