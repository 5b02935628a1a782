//! Grouping of encrypted batches into size-capped envelopes.

use std::collections::HashMap;

use cobalt_core::wire::{Envelope, ObservationBatch, ObservationMetadata};

/// Merge batches that share metadata, concatenating their observations.
/// Batches keep the order in which their metadata first appeared.
pub fn merge_batches(batches: Vec<ObservationBatch>) -> Vec<ObservationBatch> {
    let mut merged: Vec<ObservationBatch> = Vec::with_capacity(batches.len());
    let mut positions: HashMap<Option<ObservationMetadata>, usize> = HashMap::new();

    for batch in batches {
        match positions.get(&batch.meta_data) {
            Some(&position) => merged[position]
                .encrypted_observation
                .extend(batch.encrypted_observation),
            None => {
                positions.insert(batch.meta_data.clone(), merged.len());
                merged.push(batch);
            }
        }
    }
    merged
}

pub fn build_envelope(batches: Vec<ObservationBatch>, api_key: &str) -> Envelope {
    Envelope {
        batch: merge_batches(batches),
        api_key: api_key.as_bytes().to_vec(),
    }
}

/// Store entities gathered for one envelope.
#[derive(Debug, Default)]
pub struct PendingEnvelope {
    pub ids: Vec<u64>,
    pub batches: Vec<ObservationBatch>,
}

impl PendingEnvelope {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Greedy first-fit batching in arrival order.
///
/// A batch that would bring the pending total to `max_bytes` or more
/// closes the pending envelope first. A single oversized batch still gets
/// an envelope of its own.
#[derive(Debug)]
pub struct EnvelopeBatcher {
    max_bytes: usize,
    running_bytes: usize,
    pending: PendingEnvelope,
}

impl EnvelopeBatcher {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            running_bytes: 0,
            pending: PendingEnvelope::default(),
        }
    }

    /// Add a batch; returns the envelope it displaced, if any.
    pub fn push(&mut self, id: u64, batch: ObservationBatch) -> Option<PendingEnvelope> {
        let size = batch.serialized_size();
        let flushed = if self.running_bytes + size >= self.max_bytes && !self.pending.is_empty() {
            self.running_bytes = 0;
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        };

        self.running_bytes += size;
        self.pending.ids.push(id);
        self.pending.batches.push(batch);
        flushed
    }

    /// The remaining envelope, if anything is pending.
    pub fn finish(self) -> Option<PendingEnvelope> {
        (!self.pending.is_empty()).then_some(self.pending)
    }
}
